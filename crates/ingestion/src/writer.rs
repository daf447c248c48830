//! Writing frames, gap markers and run summaries.
//!
//! Every file goes to a temporary file in its destination directory first
//! and is renamed into place, so readers never see a half-written output.
//! A frame is a float32 GeoTIFF with NaN as nodata plus a world file, a
//! projection file and a provenance sidecar. The sidecar is written last and
//! marks the frame as complete.

use std::fs;
use std::io::{self, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use grid_processor::GridRegion;
use serde::Serialize;
use tempfile::NamedTempFile;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tracing::{debug, info, warn};

use crate::config::GapPolicy;
use crate::error::{IngestionError, Result};
use crate::summary::{FrameProvenance, GapRecord, OutputFrame, RunSummary};

/// GDAL's nodata tag, an ASCII number.
const GDAL_NODATA: Tag = Tag::Unknown(42113);

/// GeoKey directory for EPSG:4326, pixel-is-area.
const GEO_KEYS_WGS84: [u16; 16] = [1, 1, 0, 3, 1024, 0, 1, 2, 1025, 0, 1, 1, 2048, 0, 1, 4326];

const WGS84_WKT: &str = concat!(
    r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,"#,
    r#"AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,"#,
    r#"AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,"#,
    r#"AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]"#
);

/// Writes the outputs of a run into one directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
    gap_policy: GapPolicy,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>, gap_policy: GapPolicy) -> Self {
        Self {
            dir: dir.into(),
            gap_policy,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the GeoTIFF for output `name`.
    pub fn frame_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.tif", name))
    }

    fn provenance_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    fn gap_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.gap.json", name))
    }

    /// Provenance of a complete frame from an earlier run, if there is one.
    pub fn existing(&self, name: &str) -> Option<FrameProvenance> {
        if !self.frame_path(name).is_file() {
            return None;
        }
        let text = fs::read_to_string(self.provenance_path(name)).ok()?;
        match serde_json::from_str(&text) {
            Ok(provenance) => Some(provenance),
            Err(err) => {
                warn!(name = %name, error = %err, "Unreadable provenance, frame will be rebuilt");
                None
            }
        }
    }

    /// Write `frame` and its sidecars, returning the GeoTIFF path.
    pub fn write_frame(&self, frame: &OutputFrame) -> Result<PathBuf> {
        let path = self.frame_path(&frame.name);

        write_geotiff(&path, &frame.raster)?;
        write_world_file(&path.with_extension("tfw"), &frame.raster)?;
        write_atomically(&path.with_extension("prj"), |w| w.write_all(WGS84_WKT.as_bytes()))?;
        write_json(&self.provenance_path(&frame.name), &FrameProvenance::of(frame))?;

        let marker = self.gap_path(&frame.name);
        if marker.exists() {
            fs::remove_file(&marker)?;
            debug!(path = %marker.display(), "Removed stale gap marker");
        }

        info!(
            step = %frame.step,
            dataset = %frame.dataset_id,
            path = %path.display(),
            "Wrote frame"
        );
        Ok(path)
    }

    /// Record a gap. Writes a marker only under [`GapPolicy::Marker`].
    pub fn write_gap(&self, gap: &GapRecord) -> Result<Option<PathBuf>> {
        match self.gap_policy {
            GapPolicy::Skip => {
                info!(step = %gap.step, reasons = gap.reasons.len(), "Gap, no output written");
                Ok(None)
            }
            GapPolicy::Marker => {
                let path = self.gap_path(&gap.name);
                write_json(&path, gap)?;
                info!(step = %gap.step, path = %path.display(), "Wrote gap marker");
                Ok(Some(path))
            }
        }
    }

    /// Persist the run summary as JSON at `path`.
    pub fn write_summary(&self, summary: &RunSummary, path: &Path) -> Result<()> {
        write_json(path, summary)
    }
}

/// Write `raster` as a single-band float32 GeoTIFF in EPSG:4326.
pub fn write_geotiff(path: &Path, raster: &GridRegion) -> Result<()> {
    write_atomically(path, |w| {
        encode_geotiff(w, raster).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    })
}

fn encode_geotiff<W: Write + Seek>(writer: W, raster: &GridRegion) -> tiff::TiffResult<()> {
    let geometry = raster.geometry();
    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(raster.width as u32, raster.height as u32)?;

    let scale = [geometry.res_x(), geometry.res_y(), 0.0];
    let tiepoint = [0.0, 0.0, 0.0, geometry.bbox.min_x, geometry.bbox.max_y, 0.0];
    image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    image.encoder().write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &GEO_KEYS_WGS84[..])?;
    image.encoder().write_tag(GDAL_NODATA, "nan")?;

    image.write_data(&raster.data)
}

/// Write the world file (pixel-centre convention) of `raster` to `path`.
pub fn write_world_file(path: &Path, raster: &GridRegion) -> Result<()> {
    let geometry = raster.geometry();
    let a = geometry.res_x();
    let e = -geometry.res_y();
    let c = geometry.bbox.min_x + a / 2.0;
    let f = geometry.bbox.max_y + e / 2.0;

    write_atomically(path, |w| {
        for value in [a, 0.0, 0.0, e, c, f] {
            writeln!(w, "{:.12}", value)?;
        }
        Ok(())
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(IngestionError::encode)?;
    write_atomically(path, |w| w.write_all(&json))
}

/// Write through a temporary file in the destination directory, then
/// rename over `path`.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut fs::File>) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::PartialCoverageWarning;
    use grid_processor::MissingRegion;
    use series_common::{parse_date, BoundingBox, Cadence, TimeStep};
    use test_utils::scratch_dir;

    fn frame(name: &str) -> OutputFrame {
        let raster = GridRegion::new(vec![0.5, 0.6, f32::NAN, 0.8], 2, 2, BoundingBox::new(0.0, 0.0, 1.0, 1.0)).unwrap();
        OutputFrame {
            step: TimeStep::containing(parse_date("2020-06-21").unwrap(), Cadence::Dekad),
            name: name.to_string(),
            dataset_id: "A".to_string(),
            filled_from: Vec::new(),
            raster,
            warning: Some(PartialCoverageWarning {
                dataset_id: "A".to_string(),
                missing: MissingRegion {
                    missing_cells: 1,
                    total_cells: 4,
                    bbox: None,
                },
            }),
            sources: vec![PathBuf::from("/mirror/a.tif")],
        }
    }

    #[test]
    fn test_write_frame_files() {
        let dir = scratch_dir();
        let writer = OutputWriter::new(dir.path(), GapPolicy::Skip);
        let path = writer.write_frame(&frame("_NDVI_2020_06_d03")).unwrap();

        assert_eq!(path, dir.path().join("_NDVI_2020_06_d03.tif"));
        assert!(path.with_extension("tfw").is_file());
        assert!(path.with_extension("prj").is_file());

        let provenance = writer.existing("_NDVI_2020_06_d03").unwrap();
        assert_eq!(provenance.dataset, "A");
        assert_eq!(provenance.label, "20200621");
        assert_eq!(provenance.partial_coverage.unwrap().missing.missing_cells, 1);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_world_file_contents() {
        let dir = scratch_dir();
        let path = dir.path().join("w.tfw");
        write_world_file(&path, &frame("x").raster).unwrap();
        let values: Vec<f64> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| l.parse().unwrap())
            .collect();
        assert_eq!(values, vec![0.5, 0.0, 0.0, -0.5, 0.25, 0.75]);
    }

    #[test]
    fn test_frame_without_provenance_is_not_existing() {
        let dir = scratch_dir();
        let writer = OutputWriter::new(dir.path(), GapPolicy::Skip);
        write_geotiff(&writer.frame_path("partial"), &frame("partial").raster).unwrap();
        assert!(writer.existing("partial").is_none());
    }

    #[test]
    fn test_gap_policies() {
        let dir = scratch_dir();
        let mut gap = GapRecord::new(frame("g").step, "g");
        gap.push("A", "not found");

        let skip = OutputWriter::new(dir.path(), GapPolicy::Skip);
        assert!(skip.write_gap(&gap).unwrap().is_none());
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());

        let marker = OutputWriter::new(dir.path(), GapPolicy::Marker);
        let path = marker.write_gap(&gap).unwrap().unwrap();
        assert_eq!(path, dir.path().join("g.gap.json"));
        let stored: GapRecord = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, gap);

        // A later frame for the same step clears the marker.
        marker.write_frame(&frame("g")).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_nested_names_create_directories() {
        let dir = scratch_dir();
        let writer = OutputWriter::new(dir.path(), GapPolicy::Skip);
        let path = writer.write_frame(&frame("2020/ndvi_20200621")).unwrap();
        assert!(path.is_file());
    }
}
