mod export;
mod ids;
mod page;
mod record;

pub use export::{ImportError, NotesExport, RecordExport, export_file_name};
pub use ids::TopicId;
pub use page::PageScope;
pub use record::{ProgressRecord, TopicNote, TopicProgress};
