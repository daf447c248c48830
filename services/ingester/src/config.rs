//! Ingester runtime configuration: which datasets to use and where to
//! find them.

use anyhow::{bail, Result};
use ingestion::{DatasetBinding, Mirror};

use crate::config_loader::CatalogFile;

/// Dataset name that binds a mirror to every dataset.
pub const ANY_DATASET: &str = "*";

/// A `--mirror DATASET=LOCATION` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorArg {
    pub dataset: String,
    pub location: String,
}

impl std::str::FromStr for MirrorArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((_, mode)) = s.trim_end().rsplit_once(char::is_whitespace) {
            if matches!(mode, "rw" | "ro") {
                return Err(format!(
                    "mirror mode '{}' is not supported: mirrors are read-only and downloads are kept in the staging cache",
                    mode
                ));
            }
        }
        match s.split_once('=') {
            Some((dataset, location)) if !dataset.trim().is_empty() && !location.trim().is_empty() => Ok(Self {
                dataset: dataset.trim().to_string(),
                location: location.trim().to_string(),
            }),
            _ => Err(format!("expected DATASET=LOCATION (or *=LOCATION), got '{}'", s)),
        }
    }
}

/// Bind the selected datasets to their mirrors, in priority order.
///
/// `selected` lists dataset ids, highest priority first; empty selects
/// every catalog dataset in catalog order. Mirrors of a dataset are tried
/// in this order: command-line mirrors naming it, command-line `*`
/// mirrors, its own catalog mirrors, then the catalog defaults.
pub fn bind_datasets(catalog: &CatalogFile, selected: &[String], mirrors: &[MirrorArg]) -> Result<Vec<DatasetBinding>> {
    let ids: Vec<&str> = if selected.is_empty() {
        catalog.datasets.iter().map(|d| d.id.as_str()).collect()
    } else {
        selected.iter().map(String::as_str).collect()
    };

    for arg in mirrors {
        if arg.dataset != ANY_DATASET && !ids.contains(&arg.dataset.as_str()) {
            bail!("mirror given for dataset {} which is not selected", arg.dataset);
        }
    }

    let mut bindings = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(config) = catalog.datasets.iter().find(|d| d.id == id) else {
            let known: Vec<&str> = catalog.datasets.iter().map(|d| d.id.as_str()).collect();
            bail!("unknown dataset {} (catalog has: {})", id, known.join(", "));
        };

        let specific = mirrors.iter().filter(|m| m.dataset == id).map(|m| m.location.as_str());
        let wildcard = mirrors
            .iter()
            .filter(|m| m.dataset == ANY_DATASET)
            .map(|m| m.location.as_str());
        let from_catalog = config
            .mirrors
            .iter()
            .chain(catalog.defaults.mirrors.iter())
            .map(String::as_str);

        let mut locations: Vec<Mirror> = Vec::new();
        for location in specific.chain(wildcard).chain(from_catalog) {
            let mirror = Mirror::parse(location);
            if !locations.contains(&mirror) {
                locations.push(mirror);
            }
        }
        if locations.is_empty() {
            bail!("dataset {} has no mirror; pass --mirror {}=LOCATION", id, id);
        }

        bindings.push(DatasetBinding::new(config.to_dataset()?, locations));
    }

    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_loader::parse_catalog;

    fn catalog() -> CatalogFile {
        parse_catalog(
            r#"
defaults:
  mirrors: [/default]
datasets:
  - { id: A, resolution: 1km, datafile: "$(yyyy)/a_$(yyyy)$(mm)$(dd).tif" }
  - { id: B, resolution: 300m, datafile: "$(yyyy)/b_$(yyyy)$(mm)$(dd).tif", mirrors: ["https://b.example/pool"] }
"#,
        )
        .unwrap()
    }

    fn locations(binding: &DatasetBinding) -> Vec<String> {
        binding.mirrors.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_mirror_arg_parse() {
        let arg: MirrorArg = "A=/data/a".parse().unwrap();
        assert_eq!(arg.dataset, "A");
        assert_eq!(arg.location, "/data/a");
        assert!("nolocation".parse::<MirrorArg>().is_err());
        assert!("=x".parse::<MirrorArg>().is_err());
    }

    #[test]
    fn test_mirror_mode_rejected() {
        let err = "A=/var/data/ndvi rw".parse::<MirrorArg>().unwrap_err();
        assert!(err.contains("staging cache"));
        assert!("*=/var/data/ndvi ro".parse::<MirrorArg>().is_err());

        let spaced: MirrorArg = "A=/var/data/my rwdata".parse().unwrap();
        assert_eq!(spaced.location, "/var/data/my rwdata");
    }

    #[test]
    fn test_mirror_precedence() {
        let mirrors = vec!["*=/all".parse().unwrap(), "B=/b-local".parse().unwrap()];
        let bindings = bind_datasets(&catalog(), &["B".to_string(), "A".to_string()], &mirrors).unwrap();

        assert_eq!(bindings[0].id(), "B");
        assert_eq!(locations(&bindings[0]), vec!["/b-local", "/all", "https://b.example/pool", "/default"]);
        assert_eq!(locations(&bindings[1]), vec!["/all", "/default"]);
    }

    #[test]
    fn test_all_datasets_by_default() {
        let bindings = bind_datasets(&catalog(), &[], &[]).unwrap();
        let ids: Vec<&str> = bindings.iter().map(|b| b.id()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn test_unknown_dataset_rejected() {
        assert!(bind_datasets(&catalog(), &["C".to_string()], &[]).is_err());

        let mirrors = vec!["B=/b".parse().unwrap()];
        assert!(bind_datasets(&catalog(), &["A".to_string()], &mirrors).is_err());
    }
}
