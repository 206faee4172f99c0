use crate::{
    arrhythmia::{classify, Category, Classification, ClassifierSettings},
    error::{EngineError, Result},
    signal::{Beat, BeatId},
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-beat, per-category review marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum AnnotationValue {
    Rejected,
    #[default]
    Unflagged,
    AutoFlagged,
    Confirmed,
}

impl AnnotationValue {
    pub fn from_flag(flag: bool) -> Self {
        if flag {
            Self::AutoFlagged
        } else {
            Self::Unflagged
        }
    }

    /// Set by a reviewer rather than a classifier.
    pub fn is_reviewed(self) -> bool {
        matches!(self, Self::Rejected | Self::Confirmed)
    }

    pub fn as_i8(self) -> i8 {
        self.into()
    }
}

impl From<AnnotationValue> for i8 {
    fn from(v: AnnotationValue) -> i8 {
        match v {
            AnnotationValue::Rejected => -1,
            AnnotationValue::Unflagged => 0,
            AnnotationValue::AutoFlagged => 1,
            AnnotationValue::Confirmed => 2,
        }
    }
}

impl TryFrom<i8> for AnnotationValue {
    type Error = String;

    fn try_from(v: i8) -> std::result::Result<Self, Self::Error> {
        match v {
            -1 => Ok(Self::Rejected),
            0 => Ok(Self::Unflagged),
            1 => Ok(Self::AutoFlagged),
            2 => Ok(Self::Confirmed),
            other => Err(format!("annotation value must be -1, 0, 1 or 2, got {other}")),
        }
    }
}

/// Everything known about one beat beyond its timing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatAnnotation {
    /// Automatic flags for the categories computed by the last classification.
    pub flags: BTreeMap<Category, bool>,
    pub any_arrhythmia: bool,
    pub annotations: BTreeMap<Category, AnnotationValue>,
    pub annot_any_arrhythmia: AnnotationValue,
    pub bad_data: bool,
}

impl BeatAnnotation {
    pub fn annotation(&self, category: Category) -> AnnotationValue {
        self.annotations.get(&category).copied().unwrap_or_default()
    }

    /// Categories currently carrying a positive annotation.
    pub fn positive_categories(&self) -> Vec<Category> {
        self.annotations
            .iter()
            .filter(|(_, v)| v.as_i8() > 0)
            .map(|(c, _)| *c)
            .collect()
    }

    fn reclassify(&mut self, flags: BTreeMap<Category, bool>) {
        let mut annotations: BTreeMap<Category, AnnotationValue> = self
            .annotations
            .iter()
            .filter(|(_, v)| v.is_reviewed())
            .map(|(c, v)| (*c, *v))
            .collect();
        for (&category, &flag) in &flags {
            annotations
                .entry(category)
                .or_insert_with(|| AnnotationValue::from_flag(flag));
        }
        let confirmed_by_reviewer = self.annot_any_arrhythmia == AnnotationValue::Confirmed
            || annotations
                .values()
                .any(|v| *v == AnnotationValue::Confirmed);
        self.any_arrhythmia = flags.values().any(|f| *f) || confirmed_by_reviewer;
        if !self.annot_any_arrhythmia.is_reviewed() {
            self.annot_any_arrhythmia = AnnotationValue::from_flag(self.any_arrhythmia);
        }
        self.flags = flags;
        self.annotations = annotations;
    }
}

/// Inclusive time interval a reviewer marked as unusable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BadRange {
    pub start: f64,
    pub stop: f64,
}

impl BadRange {
    /// Endpoints are reordered so `start <= stop`.
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            start: a.min(b),
            stop: a.max(b),
        }
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.stop
    }
}

/// Review state over one detected beat table. The arrhythmia view stores
/// [`BeatId`]s into the same table, so a confirm or reject is one write.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Session {
    beats: Vec<Beat>,
    annotations: Vec<BeatAnnotation>,
    /// Categories computed by the last classification.
    computed: Vec<Category>,
    view: Vec<BeatId>,
    cursor: usize,
    selected: Option<BeatId>,
    bad_ranges: Vec<BadRange>,
}

impl Session {
    pub fn new(beats: Vec<Beat>) -> Self {
        let mut session = Self::default();
        session.redetect(beats);
        session
    }

    /// Replace the beat table. All classification and review state is dropped;
    /// bad-data marks are kept and re-applied to the new beats.
    pub fn redetect(&mut self, mut beats: Vec<Beat>) {
        for (i, beat) in beats.iter_mut().enumerate() {
            beat.id = BeatId(i as u32);
        }
        self.annotations = vec![BeatAnnotation::default(); beats.len()];
        self.beats = beats;
        self.computed.clear();
        self.view.clear();
        self.cursor = 0;
        self.selected = None;
        self.apply_bad_ranges();
        info!("review session reset with {} beats", self.beats.len());
    }

    /// Run the classifiers over the current beats and merge the result.
    pub fn classify(
        &mut self,
        conditioned: Option<&[f64]>,
        settings: &ClassifierSettings,
    ) -> Result<Classification> {
        let result = classify(&self.beats, conditioned, settings)?;
        self.apply_classification(&result)?;
        Ok(result)
    }

    /// Merge classifier output. Reviewer decisions (`2` / `-1`) survive; every
    /// automatic value is recomputed, the view rebuilt and the cursor reset.
    pub fn apply_classification(&mut self, result: &Classification) -> Result<()> {
        if let Some(bad) = result
            .categories
            .iter()
            .find(|f| f.values.len() != self.beats.len())
        {
            return Err(EngineError::invalid(format!(
                "{} has {} flags for {} beats",
                bad.category,
                bad.values.len(),
                self.beats.len()
            )));
        }
        for (i, annotation) in self.annotations.iter_mut().enumerate() {
            let flags = result
                .categories
                .iter()
                .map(|f| (f.category, f.values[i]))
                .collect();
            annotation.reclassify(flags);
        }
        self.computed = result.categories.iter().map(|f| f.category).collect();
        self.rebuild_view();
        self.cursor = 0;
        Ok(())
    }

    fn rebuild_view(&mut self) {
        self.view = self
            .beats
            .iter()
            .zip(&self.annotations)
            .filter(|(_, a)| a.any_arrhythmia)
            .map(|(b, _)| b.id)
            .collect();
        debug!("arrhythmia view holds {} beats", self.view.len());
    }

    pub fn beats(&self) -> &[Beat] {
        &self.beats
    }

    pub fn beat(&self, id: BeatId) -> Option<&Beat> {
        self.beats.get(id.index())
    }

    pub fn annotation(&self, id: BeatId) -> Option<&BeatAnnotation> {
        self.annotations.get(id.index())
    }

    /// Beats paired with their annotation record, in time order.
    pub fn rows(&self) -> impl Iterator<Item = (&Beat, &BeatAnnotation)> {
        self.beats.iter().zip(&self.annotations)
    }

    pub fn computed_categories(&self) -> &[Category] {
        &self.computed
    }

    /// Categories with an annotation value on any beat.
    pub fn annotated_categories(&self) -> BTreeSet<Category> {
        self.annotations
            .iter()
            .flat_map(|a| a.annotations.keys().copied())
            .collect()
    }

    /// Ids of beats with `any_arrhythmia` set, in time order.
    pub fn view(&self) -> &[BeatId] {
        &self.view
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<BeatId> {
        self.view.get(self.cursor).copied()
    }

    pub fn current_beat(&self) -> Option<&Beat> {
        self.current().and_then(|id| self.beat(id))
    }

    fn last_index(&self) -> usize {
        self.view.len().saturating_sub(1)
    }

    pub fn next(&mut self) -> Option<BeatId> {
        self.cursor = (self.cursor + 1).min(self.last_index());
        self.current()
    }

    pub fn prev(&mut self) -> Option<BeatId> {
        self.cursor = self.cursor.saturating_sub(1);
        self.current()
    }

    pub fn first(&mut self) -> Option<BeatId> {
        self.cursor = 0;
        self.current()
    }

    pub fn last(&mut self) -> Option<BeatId> {
        self.cursor = self.last_index();
        self.current()
    }

    /// Mark the current arrhythmia as confirmed and move on.
    pub fn confirm(&mut self) -> Option<BeatId> {
        self.decide(AnnotationValue::Confirmed)
    }

    /// Mark the current arrhythmia as rejected and move on.
    pub fn reject(&mut self) -> Option<BeatId> {
        self.decide(AnnotationValue::Rejected)
    }

    fn decide(&mut self, value: AnnotationValue) -> Option<BeatId> {
        let id = self.current()?;
        self.annotations[id.index()].annot_any_arrhythmia = value;
        debug!("beat {id} any_arrhythmia -> {}", value.as_i8());
        self.next();
        Some(id)
    }

    /// Select the first beat at or after `t`. Nothing is selected for times
    /// before the first beat or after the last.
    pub fn select_beat_at(&mut self, t: f64) -> Option<BeatId> {
        let first = self.beats.first()?;
        self.selected = if t < first.timestamp {
            None
        } else {
            self.beats.iter().find(|b| b.timestamp >= t).map(|b| b.id)
        };
        self.selected
    }

    pub fn selected(&self) -> Option<BeatId> {
        self.selected
    }

    /// Label the selected beat with `category`, put it in the arrhythmia view
    /// and move the cursor onto it.
    pub fn assign_category(&mut self, category: Category) -> Option<BeatId> {
        let id = self.selected?;
        let annotation = &mut self.annotations[id.index()];
        annotation
            .annotations
            .insert(category, AnnotationValue::Confirmed);
        annotation.any_arrhythmia = true;
        self.rebuild_view();
        if let Some(pos) = self.view.iter().position(|v| *v == id) {
            self.cursor = pos;
        }
        info!("beat {id} assigned {category}");
        Some(id)
    }

    /// Categories with a positive annotation on the selected beat.
    pub fn selected_categories(&self) -> Vec<Category> {
        self.selected
            .and_then(|id| self.annotation(id))
            .map(BeatAnnotation::positive_categories)
            .unwrap_or_default()
    }

    pub fn mark_bad_range(&mut self, a: f64, b: f64) -> BadRange {
        let range = BadRange::new(a, b);
        self.bad_ranges.push(range);
        self.apply_bad_ranges();
        range
    }

    pub fn clear_bad_ranges(&mut self) {
        self.bad_ranges.clear();
        self.apply_bad_ranges();
    }

    pub fn bad_ranges(&self) -> &[BadRange] {
        &self.bad_ranges
    }

    fn apply_bad_ranges(&mut self) {
        for (beat, annotation) in self.beats.iter().zip(self.annotations.iter_mut()) {
            annotation.bad_data = self.bad_ranges.iter().any(|r| r.contains(beat.timestamp));
        }
    }
}
