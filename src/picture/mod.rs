mod download;
mod types;

pub use download::{file_name_for, save_stream, HttpPictureDownloader, PictureDownloader};
pub use types::{DownloadFailure, PictureEvent};
