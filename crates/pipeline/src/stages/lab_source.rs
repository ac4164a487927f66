//! File-backed source for recordings stored as raw binary files.
//!
//! A JSON descriptor names the files:
//!
//! ```json
//! { "dirname": "/data/{subject}", "fspike": "{ses_id}{el_id}.sp",
//!   "fspt": "{ses_id}{el_id}{cell_id}.spt", "FS": 25000.0, "n_contacts": 1 }
//! ```
//!
//! Recordings are addressed by a node path `/<subject>/s<ses_id>/el<el_id>`,
//! optionally followed by `/cell<cell_id>` for spike-time files. Signal files
//! hold little-endian `i16` samples, frame-interleaved over contacts. Spike
//! time files hold little-endian `i32` ticks of 1/200 ms.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use byteorder::{LittleEndian, ReadBytesExt};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use spike_types::{Signal, SpikeTrain};
use tracing::{debug, warn};

use crate::component::{lock, Cached, Component, ComponentNode, EventSource, SignalSource};
use crate::config::StageConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::factory::{parse_params, StageFactory};
use crate::registry::Registry;

const KIND: &str = "lab_file_source";
const DEFAULT_SAMPLING_RATE: f64 = 25_000.0;
const TICKS_PER_MS: f64 = 200.0;

/// On-disk layout of one recording set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub dirname: String,
    pub fspike: String,
    pub fspt: String,
    #[serde(rename = "FS", default)]
    pub sampling_rate: Option<f64>,
    #[serde(default)]
    pub n_contacts: Option<usize>,
}

impl FileDescriptor {
    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let text = read_existing(path)?;
        Ok(serde_json::from_slice(&text)?)
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate.unwrap_or_else(|| {
            warn!(default = DEFAULT_SAMPLING_RATE, "descriptor has no FS, using default");
            DEFAULT_SAMPLING_RATE
        })
    }

    fn n_contacts(&self) -> usize {
        self.n_contacts.unwrap_or_else(|| {
            warn!("descriptor has no n_contacts, assuming a single contact");
            1
        })
    }
}

/// Parsed `/<subject>/s<ses_id>/el<el_id>[/cell<cell_id>]` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingNode {
    pub subject: String,
    pub ses_id: String,
    pub el_id: String,
    pub cell_id: Option<String>,
}

impl RecordingNode {
    pub fn parse(path: &str) -> PipelineResult<Self> {
        let bad = || PipelineError::invalid(format!("malformed recording node '{path}'"));
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if !(3..=4).contains(&parts.len()) {
            return Err(bad());
        }
        let ses_id = parts[1].strip_prefix('s').filter(|s| !s.is_empty()).ok_or_else(bad)?;
        let el_id = parts[2].strip_prefix("el").filter(|s| !s.is_empty()).ok_or_else(bad)?;
        let cell_id = match parts.get(3) {
            Some(cell) => Some(cell.strip_prefix("cell").filter(|s| !s.is_empty()).ok_or_else(bad)?),
            None => None,
        };
        Ok(Self {
            subject: parts[0].to_string(),
            ses_id: ses_id.to_string(),
            el_id: el_id.to_string(),
            cell_id: cell_id.map(str::to_string),
        })
    }

    fn fill(&self, template: &str) -> String {
        template
            .replace("{subject}", &self.subject)
            .replace("{ses_id}", &self.ses_id)
            .replace("{el_id}", &self.el_id)
            .replace("{cell_id}", self.cell_id.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabFileParams {
    /// Path of the JSON descriptor.
    pub descriptor: PathBuf,
    /// Recording node path.
    pub node: String,
}

struct Location {
    descriptor: FileDescriptor,
    /// Directory relative `dirname`s are resolved against.
    base_dir: PathBuf,
    node: RecordingNode,
}

impl Location {
    fn path(&self, template: &str) -> PathBuf {
        let dir = PathBuf::from(self.node.fill(&self.descriptor.dirname));
        let dir = if dir.is_absolute() { dir } else { self.base_dir.join(dir) };
        dir.join(self.node.fill(template))
    }
}

/// Reads the signal and spike times of one recording node from disk.
pub struct LabFileSource {
    node: Arc<ComponentNode>,
    location: Mutex<Location>,
    signal: Cached<Signal>,
    events: Cached<SpikeTrain>,
}

impl LabFileSource {
    pub fn open(registry: &Registry, descriptor_path: &Path, node: &str) -> PipelineResult<Arc<Self>> {
        let location = Self::locate(descriptor_path, node)?;
        Ok(Arc::new(Self {
            node: ComponentNode::new(KIND, registry, &[]),
            location: Mutex::new(location),
            signal: Cached::new(),
            events: Cached::new(),
        }))
    }

    /// Points the source at another recording node of the same descriptor.
    pub fn set_node(&self, node: &str) -> PipelineResult<()> {
        let parsed = RecordingNode::parse(node)?;
        lock(&self.location).node = parsed;
        self.node.update();
        Ok(())
    }

    fn locate(descriptor_path: &Path, node: &str) -> PipelineResult<Location> {
        Ok(Location {
            descriptor: FileDescriptor::from_file(descriptor_path)?,
            base_dir: descriptor_path.parent().map(Path::to_path_buf).unwrap_or_default(),
            node: RecordingNode::parse(node)?,
        })
    }

    fn read_signal(&self) -> PipelineResult<Signal> {
        let (path, n_contacts, fs) = {
            let location = lock(&self.location);
            (
                location.path(&location.descriptor.fspike),
                location.descriptor.n_contacts(),
                location.descriptor.sampling_rate(),
            )
        };
        if n_contacts == 0 {
            return Err(PipelineError::invalid("descriptor declares zero contacts"));
        }

        let bytes = read_existing(&path)?;
        let mut cursor = Cursor::new(bytes);
        let mut raw = Vec::new();
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            raw.push(sample);
        }
        let n_frames = raw.len() / n_contacts;
        if raw.len() % n_contacts != 0 {
            warn!(path = %path.display(), "signal file ends with a partial frame");
        }

        let data = Array2::from_shape_fn((n_contacts, n_frames), |(c, i)| raw[i * n_contacts + c] as f64);
        debug!(path = %path.display(), n_contacts, n_frames, "signal loaded");
        Signal::new(data, fs).map_err(|e| PipelineError::invalid(e.to_string()))
    }

    fn read_events(&self) -> PipelineResult<SpikeTrain> {
        let (path, fs) = {
            let location = lock(&self.location);
            if location.node.cell_id.is_none() {
                return Err(PipelineError::invalid(format!(
                    "recording node of subject '{}' names no cell; spike times need /cell<id>",
                    location.node.subject
                )));
            }
            (location.path(&location.descriptor.fspt), location.descriptor.sampling_rate())
        };

        let bytes = read_existing(&path)?;
        let mut cursor = Cursor::new(bytes);
        let mut times = Vec::new();
        while let Ok(ticks) = cursor.read_i32::<LittleEndian>() {
            times.push(ticks as f64 / TICKS_PER_MS);
        }
        debug!(path = %path.display(), n_events = times.len(), "spike times loaded");
        Ok(SpikeTrain::new(times, fs))
    }
}

/// Reads a whole file; a missing file is reported as a missing name.
fn read_existing(path: &Path) -> PipelineResult<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PipelineError::NameNotFound {
            name: path.display().to_string(),
        },
        _ => PipelineError::IoError(e),
    })
}

impl SignalSource for LabFileSource {
    fn signal(&self) -> PipelineResult<Arc<Signal>> {
        self.signal.get_or_compute(self.node.revision(), || self.read_signal())
    }
}

impl EventSource for LabFileSource {
    fn events(&self) -> PipelineResult<Arc<SpikeTrain>> {
        self.events.get_or_compute(self.node.revision(), || self.read_events())
    }
}

crate::impl_component!(LabFileSource, signal, events);

#[derive(Default)]
pub struct LabFileSourceFactory;

impl StageFactory for LabFileSourceFactory {
    fn create(&self, config: &StageConfig, registry: &Registry) -> PipelineResult<Arc<dyn Component>> {
        let params: LabFileParams = parse_params(config)?;
        Ok(LabFileSource::open(registry, &params.descriptor, &params.node)?)
    }
}
