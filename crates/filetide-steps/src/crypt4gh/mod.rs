mod add_recipient;
mod decrypt;
pub mod header;
pub mod keys;
mod validate;

pub use add_recipient::AddRecipientCrypt4gh;
pub use decrypt::DecryptCrypt4gh;
pub use validate::ValidateCrypt4gh;
