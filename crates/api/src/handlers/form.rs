//! Multipart form parsing for the generation endpoints.
//!
//! Files are collected per field name (repeated fields keep their order);
//! every other field is read as text. Typed accessors turn the text fields
//! into pipeline inputs and report malformed values as `400 BAD_REQUEST`.

use std::collections::HashMap;
use std::str::FromStr;

use axum::extract::Multipart;
use imgate_comfyui::workflow::GenerationOptions;
use imgate_core::error::CoreError;
use imgate_pipeline::generation::{DEFAULT_SIGNED_URL_HOURS, DEFAULT_USER_ID};
use imgate_pipeline::storage::UrlStyle;
use imgate_pipeline::{Capabilities, InputImage};

use crate::error::{AppError, AppResult};

#[derive(Debug, Default)]
pub struct GenerationForm {
    files: HashMap<String, Vec<InputImage>>,
    fields: HashMap<String, String>,
}

impl GenerationForm {
    /// Drain a multipart body. A field with a file name is treated as a file.
    pub async fn parse(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            let name = field.name().unwrap_or("").to_string();
            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                    form.files
                        .entry(name)
                        .or_default()
                        .push(InputImage::new(filename, data.to_vec()));
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                    form.fields.insert(name, text);
                }
            }
        }

        Ok(form)
    }

    #[cfg(test)]
    fn from_parts(files: Vec<(&str, InputImage)>, fields: Vec<(&str, &str)>) -> Self {
        let mut form = Self::default();
        for (name, file) in files {
            form.files.entry(name.to_string()).or_default().push(file);
        }
        for (name, value) in fields {
            form.fields.insert(name.to_string(), value.to_string());
        }
        form
    }

    /// The single required file in field `name`.
    pub fn take_file(&mut self, name: &str) -> AppResult<InputImage> {
        self.files
            .remove(name)
            .and_then(|files| files.into_iter().next())
            .ok_or_else(|| CoreError::Validation(format!("Missing required '{name}' file")).into())
    }

    /// Every file sent under field `name`, in upload order.
    pub fn take_files(&mut self, name: &str) -> Vec<InputImage> {
        self.files.remove(name).unwrap_or_default()
    }

    /// Trimmed text field, `None` when absent or blank.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// The prompt as sent; blank prompts are rejected by the pipeline.
    pub fn prompt(&self) -> String {
        self.fields.get("prompt").cloned().unwrap_or_default()
    }

    pub fn user_id(&self) -> String {
        self.text("user_id").unwrap_or(DEFAULT_USER_ID).to_string()
    }

    pub fn style(&self) -> Option<String> {
        self.text("style").map(str::to_string)
    }

    /// Parse a numeric field.
    pub fn number<T: FromStr>(&self, name: &str) -> AppResult<Option<T>> {
        self.text(name)
            .map(|raw| {
                raw.parse()
                    .map_err(|_| AppError::BadRequest(format!("'{name}' must be a number, got '{raw}'")))
            })
            .transpose()
    }

    /// Parse a boolean field (`true/false`, `1/0`, `yes/no`, `on/off`).
    pub fn flag(&self, name: &str, default: bool) -> AppResult<bool> {
        match self.text(name).map(str::to_ascii_lowercase).as_deref() {
            None => Ok(default),
            Some("true" | "1" | "yes" | "on") => Ok(true),
            Some("false" | "0" | "no" | "off") => Ok(false),
            Some(other) => Err(AppError::BadRequest(format!(
                "'{name}' must be true or false, got '{other}'"
            ))),
        }
    }

    pub fn options(&self) -> GenerationOptions {
        let mut options = GenerationOptions::default();
        if let Some(size) = self.text("size") {
            options.size = size.to_string();
        }
        options
    }

    /// Capability flags. Persistence defaults on only when a store is
    /// configured.
    pub fn capabilities(&self, storage_configured: bool) -> AppResult<Capabilities> {
        let signed = self.flag("use_signed_url", true)?;
        let hours: u32 = self
            .number("signed_url_hours")?
            .unwrap_or(DEFAULT_SIGNED_URL_HOURS);

        Ok(Capabilities {
            enhance_prompt: self.flag("enhance_prompt", false)?,
            persist_to_storage: self.flag("save_to_storage", storage_configured)?,
            store_input_image: self.flag("store_input_image", true)?,
            return_inline: self.flag("return_base64", true)?,
            url_style: if signed {
                UrlStyle::signed_for_hours(hours)
            } else {
                UrlStyle::Public
            },
        })
    }
}
