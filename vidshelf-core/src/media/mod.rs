pub mod catalog;
pub mod convert;
pub mod hash;
pub mod library;
pub mod probe;
pub mod rename;
pub mod scanner;
pub mod thumbnail;
pub mod tools;
pub mod trash;

pub use catalog::{ProductCatalog, ProductData};
pub use convert::{
    ConversionEvent, ConversionStatus, ConversionSupervisor, FfmpegTranscoder, Transcoder,
};
pub use hash::{CacheKey, HashService};
pub use library::VideoLibrary;
pub use probe::{DurationService, FfprobeProber, MediaProber};
pub use rename::{BatchRenameReport, FileOperations, RenameError, RenamePlan};
pub use scanner::{FolderScanner, ScanEvent, ScanOutcome, ScanPhase};
pub use thumbnail::{FfmpegThumbnailExtractor, ThumbnailCache, ThumbnailExtractor};
pub use tools::{ToolError, ToolRunner};
pub use trash::{TrashBin, TrashRecord};
