pub mod archive;
mod create;
mod extract_directory;
mod extract_file;
mod preview;
mod writer;

pub use create::CreateZip;
pub use extract_directory::ExtractDirectoryZip;
pub use extract_file::ExtractFileZip;
pub use preview::PreviewZip;
pub use writer::ZipStreamWriter;

/// MIME type guessed from a file name's extension.
pub(crate) fn guess_media_type(name: &str) -> Option<String> {
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.essence_str().to_string())
}
