//! The canonical route set and its typed lookups.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A row of the canonical route table. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRoute {
  pub route_integration_code: String,
  pub route_name:             String,
  #[serde(default)]
  pub client_name:            Option<String>,
}

/// Normalise a route name the same way the SQL layer does
/// (`TRIM(LOWER(name))`): ASCII lowercase, surrounding spaces removed.
pub fn normalize_route_name(name: &str) -> String {
  name.trim_matches(' ').to_ascii_lowercase()
}

/// Immutable lookups over the canonical route set, built once per run.
///
/// Membership in the catalog is what authorises the reconciler to remove a
/// stored row: identifiers outside it belong to someone else.
#[derive(Debug, Clone, Default)]
pub struct RouteCatalog {
  code_to_name: HashMap<String, String>,
  codes:        HashSet<String>,
  names:        HashSet<String>,
}

impl RouteCatalog {
  pub fn contains_code(&self, code: &str) -> bool { self.codes.contains(code) }

  /// `name` must already be normalised.
  pub fn contains_name(&self, name: &str) -> bool { self.names.contains(name) }

  /// The normalised route name for a route integration code.
  pub fn name_for(&self, code: &str) -> Option<&str> {
    self.code_to_name.get(code).map(String::as_str)
  }

  pub fn len(&self) -> usize { self.codes.len() }

  pub fn is_empty(&self) -> bool { self.codes.is_empty() }
}

impl FromIterator<CanonicalRoute> for RouteCatalog {
  fn from_iter<I: IntoIterator<Item = CanonicalRoute>>(iter: I) -> Self {
    let mut catalog = Self::default();
    for route in iter {
      let code = route.route_integration_code.trim().to_owned();
      if code.is_empty() {
        continue;
      }
      let name = normalize_route_name(&route.route_name);
      if !name.is_empty() {
        catalog.code_to_name.insert(code.clone(), name.clone());
        catalog.names.insert(name);
      }
      catalog.codes.insert(code);
    }
    catalog
  }
}
