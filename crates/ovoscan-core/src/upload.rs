//! Upload validation
//!
//! Every file in a batch is checked before any session exists: a batch with
//! one bad file is rejected as a whole.

use std::collections::HashSet;

use bytes::Bytes;
use image::ImageFormat;

use crate::config::UploadConfig;
use crate::error::{Error, Result};

/// One image as received from a client
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub data: Bytes,
}

impl ImageUpload {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}

/// Checks batch shape and image content
#[derive(Debug, Clone)]
pub struct UploadValidator {
    max_files: usize,
    max_file_bytes: usize,
    formats: Vec<ImageFormat>,
}

impl UploadValidator {
    pub fn new(max_files: usize, max_file_bytes: usize, formats: Vec<ImageFormat>) -> Self {
        Self {
            max_files,
            max_file_bytes,
            formats,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        Ok(Self::new(
            config.max_files,
            config.max_file_bytes,
            config.formats()?,
        ))
    }

    /// Validate a batch and give every file a unique name
    ///
    /// Repeated filenames get an occurrence suffix: the second `a.png`
    /// becomes `a.png#2`.
    pub fn validate(&self, batch: Vec<ImageUpload>) -> Result<Vec<ImageUpload>> {
        if batch.is_empty() {
            return Err(Error::Validation("no files were uploaded".to_string()));
        }
        if batch.len() > self.max_files {
            return Err(Error::Validation(format!(
                "too many files: {} (limit {})",
                batch.len(),
                self.max_files
            )));
        }

        for file in &batch {
            self.check_file(file)?;
        }

        Ok(disambiguate(batch))
    }

    fn check_file(&self, file: &ImageUpload) -> Result<()> {
        if file.filename.trim().is_empty() {
            return Err(Error::Validation("every file needs a filename".to_string()));
        }
        if file.data.is_empty() {
            return Err(Error::Validation(format!("{}: file is empty", file.filename)));
        }
        if file.data.len() > self.max_file_bytes {
            return Err(Error::Validation(format!(
                "{}: file is {} bytes (limit {})",
                file.filename,
                file.data.len(),
                self.max_file_bytes
            )));
        }

        let format = image::guess_format(&file.data).map_err(|_| {
            Error::Validation(format!("{}: not a recognized image", file.filename))
        })?;
        if !self.formats.contains(&format) {
            return Err(Error::Validation(format!(
                "{}: {} images are not accepted",
                file.filename,
                format_name(format)
            )));
        }

        Ok(())
    }
}

fn format_name(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("unknown")
}

fn disambiguate(batch: Vec<ImageUpload>) -> Vec<ImageUpload> {
    let mut used = HashSet::with_capacity(batch.len());
    batch
        .into_iter()
        .map(|mut file| {
            if used.contains(&file.filename) {
                let mut n = 2;
                while used.contains(&format!("{}#{}", file.filename, n)) {
                    n += 1;
                }
                file.filename = format!("{}#{}", file.filename, n);
            }
            used.insert(file.filename.clone());
            file
        })
        .collect()
}
