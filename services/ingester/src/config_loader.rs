//! Dataset catalog loader.
//!
//! The catalog is a YAML file listing the source products the ingester
//! knows about, with their file layout, optional manifest, quality
//! conventions and default mirrors.
//!
//! Supports environment variable substitution using ${VAR} and
//! ${VAR:-default} syntax. Naming placeholders such as `$(yyyy)` are left
//! untouched.

use anyhow::{Context, Result};
use grid_processor::QualityMask;
use ingestion::{Dataset, ManifestSpec};
use serde::{Deserialize, Serialize};
use series_common::{Cadence, NamingTemplate, Resolution};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

// ============================================================================
// Catalog file
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub defaults: CatalogDefaults,
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDefaults {
    /// Mirrors used by every dataset that has no mirror of its own.
    #[serde(default)]
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub resolution: String,
    #[serde(default = "default_cadence")]
    pub cadence: String,
    pub datafile: String,
    #[serde(default)]
    pub manifest: Option<ManifestConfig>,
    #[serde(default)]
    pub tiles: Vec<String>,
    #[serde(default)]
    pub quality: Option<QualityConfig>,
    #[serde(default)]
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    pub url: String,
    pub entry: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    pub valid_range: Option<[f32; 2]>,
    #[serde(default)]
    pub fill_values: Vec<f32>,
}

fn default_cadence() -> String {
    "dekad".to_string()
}

impl DatasetConfig {
    /// Build the dataset this entry describes.
    pub fn to_dataset(&self) -> Result<Dataset> {
        let resolution = Resolution::parse(&self.resolution)
            .with_context(|| format!("dataset {}: bad resolution", self.id))?;
        let cadence: Cadence = self
            .cadence
            .parse()
            .with_context(|| format!("dataset {}: bad cadence", self.id))?;
        let datafile = NamingTemplate::parse(&self.datafile)
            .with_context(|| format!("dataset {}: bad datafile template", self.id))?;

        let mut dataset = Dataset::new(self.id.clone(), resolution, cadence, datafile).with_tiles(self.tiles.clone());

        if let Some(manifest) = &self.manifest {
            let entry = NamingTemplate::parse(&manifest.entry)
                .with_context(|| format!("dataset {}: bad manifest entry template", self.id))?;
            dataset = dataset.with_manifest(ManifestSpec {
                url: manifest.url.clone(),
                entry,
            });
        }

        if let Some(quality) = &self.quality {
            dataset = dataset.with_quality(QualityMask::new(
                quality.valid_range.map(|[min, max]| (min, max)),
                quality.fill_values.clone(),
            ));
        }

        Ok(dataset)
    }
}

// ============================================================================
// Loading Functions
// ============================================================================

/// Load and parse a catalog file with environment variable substitution.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<CatalogFile> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read dataset catalog from {:?}", path.as_ref()))?;
    parse_catalog(&content).with_context(|| format!("Invalid dataset catalog {:?}", path.as_ref()))
}

/// Parse catalog YAML.
pub fn parse_catalog(content: &str) -> Result<CatalogFile> {
    let expanded = shellexpand::env(content).context("Failed to expand environment variables")?;

    let catalog: CatalogFile =
        serde_yaml::from_str(&expanded).with_context(|| "Failed to parse dataset catalog YAML")?;

    validate_catalog(&catalog)?;

    Ok(catalog)
}

// ============================================================================
// Validation
// ============================================================================

fn validate_catalog(catalog: &CatalogFile) -> Result<()> {
    anyhow::ensure!(!catalog.datasets.is_empty(), "Catalog lists no datasets");

    let mut seen = HashSet::new();
    for dataset in &catalog.datasets {
        anyhow::ensure!(!dataset.id.is_empty(), "Dataset id cannot be empty");
        anyhow::ensure!(
            seen.insert(dataset.id.as_str()),
            "Dataset {} is listed more than once",
            dataset.id
        );
        if let Some(quality) = &dataset.quality {
            if let Some([min, max]) = quality.valid_range {
                anyhow::ensure!(
                    min <= max,
                    "Dataset {}: valid_range minimum {} is above maximum {}",
                    dataset.id,
                    min,
                    max
                );
            }
        }
        // Catch template and resolution errors at load time.
        dataset.to_dataset()?;
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
defaults:
  mirrors:
    - ${CATALOG_TEST_MIRROR:-/var/data/cgls}
datasets:
  - id: NDVI_300M
    resolution: 300m
    datafile: "$(yyyy)/$(yyyy)$(mm)$(dd)/ndvi300_$(yyyy)$(mm)$(dd).tif"
    manifest:
      url: https://archive.example/manifest.txt
      entry: "$(yyyy)/$(mm)/$(dd)/ndvi300_$(yyyy)$(mm)$(dd).tif"
    quality:
      valid_range: [0, 250]
      fill_values: [251, 252, 253, 254, 255]
  - id: NDVI_1KM
    resolution: 1km
    cadence: dekad
    datafile: "$(yyyy)$(mm)$(dd)_$(tile).tif"
    tiles: [X18Y03, X19Y03]
    mirrors:
      - https://archive.example/pool
"#;

    #[test]
    fn test_parse_catalog() {
        std::env::remove_var("CATALOG_TEST_MIRROR");
        let catalog = parse_catalog(CATALOG).unwrap();
        assert_eq!(catalog.defaults.mirrors, vec!["/var/data/cgls"]);
        assert_eq!(catalog.datasets.len(), 2);

        let first = catalog.datasets[0].to_dataset().unwrap();
        assert_eq!(first.resolution.pixels_per_degree(), 336);
        assert_eq!(first.cadence, Cadence::Dekad);
        assert!(first.manifest.is_some());
        assert!(!first.quality.is_valid(252.0));
        assert!(first.quality.is_valid(120.0));

        let second = catalog.datasets[1].to_dataset().unwrap();
        assert_eq!(second.tiles.len(), 2);
        assert_eq!(catalog.datasets[1].mirrors, vec!["https://archive.example/pool"]);
    }

    #[test]
    fn test_env_substitution_keeps_placeholders() {
        std::env::set_var("CATALOG_TEST_ROOT", "/srv/mirror");
        let catalog = parse_catalog(
            r#"
defaults:
  mirrors: ["${CATALOG_TEST_ROOT}"]
datasets:
  - id: A
    resolution: 1km
    datafile: "$(yyyy)/a_$(yyyy)$(mm)$(dd).tif"
"#,
        )
        .unwrap();
        assert_eq!(catalog.defaults.mirrors, vec!["/srv/mirror"]);
        assert_eq!(catalog.datasets[0].datafile, "$(yyyy)/a_$(yyyy)$(mm)$(dd).tif");
    }

    #[test]
    fn test_shipped_catalog() {
        let catalog = parse_catalog(include_str!("../../../config/datasets.yaml")).unwrap();
        let ids: Vec<&str> = catalog.datasets.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "CGLS_NDVI300_GLOBE_OLCI_V201",
                "CGLS_NDVI1K_GLOBE_PROBAV_V301",
                "CGLS_NDVI1K_GLOBE_VGT_V301"
            ]
        );
        assert!(catalog.datasets.iter().all(|d| d.manifest.is_some()));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = parse_catalog(
            r#"
datasets:
  - { id: A, resolution: 1km, datafile: "$(yyyy).tif" }
  - { id: A, resolution: 1km, datafile: "$(yyyy).tif" }
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_resolution_rejected() {
        let result = parse_catalog(
            r#"
datasets:
  - { id: A, resolution: 2km, datafile: "$(yyyy).tif" }
"#,
        );
        assert!(result.is_err());
    }
}
