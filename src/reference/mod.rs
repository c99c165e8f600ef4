//! Image references and the pieces they parse into


mod digest;
mod name;
mod tag;
mod version;

pub use digest::ContentDigest;
pub use name::ImageName;
pub use tag::Tag;
pub use version::ImageVersion;

/// Render a stored reference key next to its repository name
///
/// Tag keys join with a colon, digest keys with an `@`, matching the way the
/// reference was originally written.
pub fn image_reference(repository: &str, reference: &str) -> String {
    if reference.contains(':') {
        format!("{}@{}", repository, reference)
    } else {
        format!("{}:{}", repository, reference)
    }
}

/// Shorten an image ID for display, dropping any hash-format prefix
///
/// Returns the first twelve characters of the hex portion, or the whole
/// portion when it is already shorter than that.
pub fn truncate_id(id: &str) -> &str {
    let hex = match id.find(':') {
        Some(colon) => &id[colon + 1..],
        None => id,
    };
    match hex.char_indices().nth(12) {
        Some((end, _)) => &hex[..end],
        None => hex,
    }
}
