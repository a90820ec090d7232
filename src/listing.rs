//! Pagination, sorting and search parameters shared by the listing
//! endpoints, plus the `{data, meta}` response envelope.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 5;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Query parameters accepted by every listing endpoint. `S` is the
/// per-kind sortable-field enum.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "S: Deserialize<'de>"))]
pub struct ListParams<S> {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default)]
    pub sort: Option<S>,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub search: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl<S> ListParams<S> {
    /// Clamps page and page size into their accepted ranges.
    pub fn clamped(mut self) -> Self {
        self.page = self.page.max(1);
        self.per_page = self.per_page.clamp(1, MAX_PAGE_SIZE);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListMeta {
    pub page: u32,
    pub per_page: u32,
    pub sort: Option<&'static str>,
    pub direction: SortDirection,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub meta: ListMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySortField {
    Name,
    Description,
}

impl CategorySortField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastMemberSortField {
    Name,
    Type,
}

impl CastMemberSortField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Type => "type",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenreSortField {
    Name,
}

impl GenreSortField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoSortField {
    Title,
}

impl VideoSortField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
        }
    }
}
