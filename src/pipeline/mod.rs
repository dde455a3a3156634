//! Record post-processing pipeline
//!
//! Every record the crawler extracts passes through two steps: image
//! acquisition, which downloads the record's images and sets its
//! `image_paths`, and completion, which decides whether the record is
//! emitted or dropped.

mod completion;
mod images;
pub mod storage;

pub use completion::{Completion, DropReason, complete};
pub use images::{
    Acquired, ImageError, ImageJob, ImagePipeline, JobOutcome, image_basename, image_path,
    sanitize_title,
};
pub use storage::{FsImageStore, ImageStore, StorageConfig, StoreError, load_feed, write_feed};
