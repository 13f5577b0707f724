//! Built-in pipeline steps: ZIP introspection, extraction and creation,
//! image preview, and Crypt4GH decryption, re-addressing and validation.

pub mod crypt4gh;
pub mod picture;
pub mod zip;

use filetide_core::StepRegistry;

pub use crypt4gh::{AddRecipientCrypt4gh, DecryptCrypt4gh, ValidateCrypt4gh};
pub use picture::PreviewPicture;
pub use zip::{CreateZip, ExtractDirectoryZip, ExtractFileZip, PreviewZip};

/// Registry with every built-in step wired in.
pub fn builtin_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry
        .register("preview_zip", || Box::new(PreviewZip))
        .register("extract_file_zip", || Box::new(ExtractFileZip))
        .register("extract_directory_zip", || Box::new(ExtractDirectoryZip))
        .register("create_zip", || Box::new(CreateZip))
        .register("preview_picture", || Box::new(PreviewPicture))
        .register("decrypt_crypt4gh", || Box::new(DecryptCrypt4gh))
        .register("add_recipient_crypt4gh", || Box::new(AddRecipientCrypt4gh))
        .register("validate_crypt4gh", || Box::new(ValidateCrypt4gh));
    registry
}
