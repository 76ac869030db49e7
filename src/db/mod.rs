pub mod reader;
pub mod writer;

pub use reader::LogReader;
pub use writer::LogWriter;
