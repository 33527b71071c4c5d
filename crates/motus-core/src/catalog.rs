//! The motion file list shown next to the viewer

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::motion_file::{MotionFile, MotionFileId};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("unknown motion file {0}")]
    UnknownFile(MotionFileId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

/// Parse a `YYYY-MM-DD` filter input
pub fn parse_filter_date(input: &str) -> Result<NaiveDate, CatalogError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|_| CatalogError::InvalidDate(input.to_string()))
}

#[derive(Debug, Clone, Default)]
pub struct MotionCatalog {
    files: Vec<MotionFile>,
    order: SortOrder,
    date_filter: Option<NaiveDate>,
    selected: Option<MotionFileId>,
}

impl MotionCatalog {
    pub fn new(files: Vec<MotionFile>) -> Self {
        let mut catalog = Self {
            files,
            ..Default::default()
        };
        catalog.sort();
        catalog
    }

    /// Replace the list (e.g. after fetching another patient's files). Keeps
    /// the selection only if the file is still present.
    pub fn replace(&mut self, files: Vec<MotionFile>) {
        self.files = files;
        if let Some(id) = self.selected {
            if self.get(id).is_none() {
                self.selected = None;
            }
        }
        self.sort();
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn set_order(&mut self, order: SortOrder) {
        if self.order != order {
            self.order = order;
            self.sort();
        }
    }

    pub fn date_filter(&self) -> Option<NaiveDate> {
        self.date_filter
    }

    /// Show only files uploaded on the given day; empty input clears the filter
    pub fn filter_by_date(&mut self, input: &str) -> Result<(), CatalogError> {
        if input.trim().is_empty() {
            self.date_filter = None;
            return Ok(());
        }
        self.date_filter = Some(parse_filter_date(input)?);
        Ok(())
    }

    pub fn clear_filter(&mut self) {
        self.date_filter = None;
    }

    /// Files in display order with the date filter applied
    pub fn visible(&self) -> impl Iterator<Item = &MotionFile> {
        let filter = self.date_filter;
        self.files
            .iter()
            .filter(move |f| filter.is_none_or(|day| f.created_at.date_naive() == day))
    }

    /// Files created on or after `day`, in display order
    pub fn created_since(&self, day: NaiveDate) -> impl Iterator<Item = &MotionFile> {
        self.files
            .iter()
            .filter(move |f| f.created_at.date_naive() >= day)
    }

    pub fn get(&self, id: MotionFileId) -> Option<&MotionFile> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn select(&mut self, id: MotionFileId) -> Result<&MotionFile, CatalogError> {
        let index = self
            .files
            .iter()
            .position(|f| f.id == id)
            .ok_or(CatalogError::UnknownFile(id))?;
        self.selected = Some(id);
        Ok(&self.files[index])
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&MotionFile> {
        self.selected.and_then(|id| self.get(id))
    }

    /// Apply a `new_file` notification. Returns false if the file was already listed.
    pub fn insert(&mut self, file: MotionFile) -> bool {
        if self.get(file.id).is_some() {
            return false;
        }
        debug!(file = %file.id, name = %file.name, "Motion file added");
        self.files.push(file);
        self.sort();
        true
    }

    fn sort(&mut self) {
        match self.order {
            SortOrder::Newest => self.files.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortOrder::Oldest => self.files.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }
    }
}
