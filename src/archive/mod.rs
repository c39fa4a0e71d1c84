//! Zip extraction for downloaded artifact archives.

mod path;
mod zip_ops;

pub(crate) use zip_ops::extract_zip_flat;
