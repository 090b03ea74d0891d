//! Report dimensions added to every export, in order.

use std::borrow::Cow;
use std::str::FromStr;

use crate::errors::ExportError;

/// How search text is typed into the dimension picker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DimensionMode {
    /// Only dimensions with an explicit search substring get one typed; the
    /// others are picked from the options already visible when the picker opens.
    #[default]
    Parity,
    /// Always filter the picker, falling back to the lower-cased name.
    Uniform,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionSpec {
    /// Option label as shown in the picker.
    pub name: String,
    pub search: Option<String>,
    pub exact: bool,
}

impl DimensionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            search: None,
            exact: false,
        }
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    /// Text to type into the picker's searchbox, if any.
    pub fn search_term(&self, mode: DimensionMode) -> Option<Cow<'_, str>> {
        match (&self.search, mode) {
            (Some(term), _) => Some(Cow::Borrowed(term.as_str())),
            (None, DimensionMode::Parity) => None,
            (None, DimensionMode::Uniform) => Some(Cow::Owned(self.name.to_lowercase())),
        }
    }
}

/// `Name` or `Name:search`. A leading `=` on the name requests an exact match.
impl FromStr for DimensionSpec {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, search) = match s.split_once(':') {
            Some((name, search)) => (name.trim(), Some(search.trim())),
            None => (s.trim(), None),
        };
        let (name, exact) = match name.strip_prefix('=') {
            Some(rest) => (rest.trim(), true),
            None => (name, false),
        };
        if name.is_empty() {
            return Err(ExportError::Config(format!(
                "Dimension name is empty in \"{s}\""
            )));
        }

        let mut spec = DimensionSpec::new(name);
        if let Some(term) = search.filter(|t| !t.is_empty()) {
            spec = spec.search(term);
        }
        if exact {
            spec = spec.exact();
        }
        Ok(spec)
    }
}

/// Item, Card Type, Transaction Day Of Week, Card Bin Number, Ship State.
pub fn default_dimensions() -> Vec<DimensionSpec> {
    vec![
        DimensionSpec::new("Item").search("item").exact(),
        DimensionSpec::new("Card Type").search("card"),
        DimensionSpec::new("Transaction Day Of Week"),
        DimensionSpec::new("Card Bin Number").search("bin").exact(),
        DimensionSpec::new("Ship State"),
    ]
}
