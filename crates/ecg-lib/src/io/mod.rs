pub mod report;
pub mod table;

pub use report::{write_report, ReportPaths};
pub use table::{read_signal_csv, read_voltage_series, write_signal_csv, SignalTable};
