use crate::libs::zlib::{self, GzReader, GzWriter};
use crate::step::Payload;
use crate::value::HandleId;
use flate2::{Compress, Decompress};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use thiserror::Error;

/// Errors raised while acquiring fixtures. Any of these moves a case straight
/// from BUILDING to FAILED.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum FixtureError {
    #[error("Could not create the run's temporary directory: {0}")]
    TempDir(String),
    #[error("Fixture '{name}' ({kind}) failed to initialize: {reason}")]
    Init {
        name: String,
        kind: String,
        reason: String,
    },
    #[error("Fixture name '{0}' is declared twice")]
    DuplicateName(String),
}

/// Fixtures still live once teardown has finished. Indicates a defect in
/// teardown itself, never a property of the harness under test.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Fixtures still live after teardown: {fixtures:?}")]
pub struct ResourceLeakError {
    pub fixtures: Vec<String>,
}

/// Declarative fixture configuration, as written in a case.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FixtureSpec {
    pub name: String,
    pub kind: FixtureKind,
}

impl FixtureSpec {
    pub fn new(name: impl Into<String>, kind: FixtureKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum FixtureKind {
    /// A deflate stream initialized at `level` (-1 is the library default).
    Deflate { level: i64 },
    Inflate,
    /// A file inside the run's temporary directory.
    TempFile {
        #[serde(default)]
        contents: Option<Payload>,
    },
    /// A zero-filled buffer.
    Buffer { len: usize },
    /// A parsed JSON document.
    JsonDoc { text: String },
}

impl FixtureKind {
    pub fn name(&self) -> &'static str {
        match self {
            FixtureKind::Deflate { .. } => "deflate",
            FixtureKind::Inflate => "inflate",
            FixtureKind::TempFile { .. } => "temp-file",
            FixtureKind::Buffer { .. } => "buffer",
            FixtureKind::JsonDoc { .. } => "json-doc",
        }
    }
}

/// A temp file together with the read cursor of `file-read`.
pub struct TempFileFixture {
    pub file: NamedTempFile,
    pub cursor: u64,
}

/// Opaque external-library state owned by one run.
pub enum Fixture {
    Deflate(Compress),
    Inflate(Decompress),
    TempFile(TempFileFixture),
    Buffer(Vec<u8>),
    Json(serde_json::Value),
    GzWriter(GzWriter),
    GzReader(GzReader),
}

impl Fixture {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Fixture::Deflate(_) => "deflate",
            Fixture::Inflate(_) => "inflate",
            Fixture::TempFile(_) => "temp-file",
            Fixture::Buffer(_) => "buffer",
            Fixture::Json(_) => "json",
            Fixture::GzWriter(_) => "gz-writer",
            Fixture::GzReader(_) => "gz-reader",
        }
    }

    /// Ends the underlying library state. Streams and trees end on drop;
    /// gz writers flush their trailer and temp files are deleted.
    fn release(self) -> std::io::Result<()> {
        match self {
            Fixture::GzWriter(writer) => writer.finish(),
            Fixture::TempFile(temp) => temp.file.close(),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixture::{}", self.kind_name())
    }
}

enum SlotState {
    Live(Fixture),
    Released,
    /// Ownership moved into another fixture (a JSON item added to a parent).
    Transferred(HandleId),
}

struct Slot {
    name: String,
    state: SlotState,
}

/// Result of [`FixtureSet::teardown`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TeardownReport {
    /// Names of fixtures released by this teardown, in release order.
    pub released: Vec<String>,
    pub errors: Vec<String>,
    pub temp_dir_removed: bool,
}

/// Arena of every fixture acquired during one run, declared or created by a
/// step. Slots are never reused, so a [`HandleId`] stays unambiguous after its
/// fixture is released.
pub struct FixtureSet {
    case_id: String,
    slots: Vec<Slot>,
    dir: Option<TempDir>,
    torn_down: bool,
}

impl FixtureSet {
    /// Creates an empty arena with its own temporary directory, named after the
    /// case so concurrent runs never share files.
    pub fn new(case_id: &str, temp_root: Option<&Path>) -> Result<Self, FixtureError> {
        let prefix = format!("callseq-{}-", sanitize(case_id));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| FixtureError::TempDir(e.to_string()))?;

        Ok(Self {
            case_id: case_id.to_string(),
            slots: Vec::new(),
            dir: Some(dir),
            torn_down: false,
        })
    }

    /// Acquires every declared fixture in order, stopping at the first failure.
    /// Fixtures acquired before the failure stay in the set for teardown.
    pub fn build_all(&mut self, specs: &[FixtureSpec]) -> Result<(), FixtureError> {
        for spec in specs {
            if self.lookup(&spec.name).is_some() {
                return Err(FixtureError::DuplicateName(spec.name.clone()));
            }
            let fixture = self.build_one(spec)?;
            tracing::debug!(
                case = %self.case_id,
                fixture = %spec.name,
                kind = spec.kind.name(),
                "fixture acquired"
            );
            self.acquire(spec.name.clone(), fixture);
        }
        Ok(())
    }

    fn build_one(&self, spec: &FixtureSpec) -> Result<Fixture, FixtureError> {
        let init_err = |reason: String| FixtureError::Init {
            name: spec.name.clone(),
            kind: spec.kind.name().to_string(),
            reason,
        };

        match &spec.kind {
            FixtureKind::Deflate { level } => zlib::deflate_stream(*level)
                .map(Fixture::Deflate)
                .ok_or_else(|| init_err(format!("stream-error for level {level}"))),
            FixtureKind::Inflate => Ok(Fixture::Inflate(zlib::inflate_stream())),
            FixtureKind::TempFile { contents } => {
                let dir = self
                    .temp_dir()
                    .ok_or_else(|| init_err("temporary directory already removed".into()))?;
                let mut file = tempfile::Builder::new()
                    .prefix(&format!("{}-", sanitize(&spec.name)))
                    .tempfile_in(dir)
                    .map_err(|e| init_err(e.to_string()))?;
                if let Some(payload) = contents {
                    file.write_all(&payload.materialize())
                        .and_then(|_| file.flush())
                        .map_err(|e| init_err(e.to_string()))?;
                }
                Ok(Fixture::TempFile(TempFileFixture { file, cursor: 0 }))
            }
            FixtureKind::Buffer { len } => Ok(Fixture::Buffer(vec![0u8; *len])),
            FixtureKind::JsonDoc { text } => serde_json::from_str(text)
                .map(Fixture::Json)
                .map_err(|e| init_err(e.to_string())),
        }
    }

    pub fn acquire(&mut self, name: impl Into<String>, fixture: Fixture) -> HandleId {
        let id = HandleId(self.slots.len());
        self.slots.push(Slot {
            name: name.into(),
            state: SlotState::Live(fixture),
        });
        id
    }

    /// Acquires a fixture created by a step; named after the operation.
    pub fn acquire_anonymous(&mut self, op: &str, fixture: Fixture) -> HandleId {
        let name = format!("{op}#{}", self.slots.len());
        self.acquire(name, fixture)
    }

    pub fn lookup(&self, name: &str) -> Option<HandleId> {
        self.slots
            .iter()
            .position(|slot| slot.name == name)
            .map(HandleId)
    }

    pub fn get(&self, id: HandleId) -> Option<&Fixture> {
        match self.slots.get(id.0).map(|slot| &slot.state) {
            Some(SlotState::Live(fixture)) => Some(fixture),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut Fixture> {
        match self.slots.get_mut(id.0).map(|slot| &mut slot.state) {
            Some(SlotState::Live(fixture)) => Some(fixture),
            _ => None,
        }
    }

    pub fn is_live(&self, id: HandleId) -> bool {
        self.get(id).is_some()
    }

    /// Moves a live fixture out of its slot because `into` now owns it.
    /// Teardown will not release a transferred slot.
    pub fn transfer(&mut self, id: HandleId, into: HandleId) -> Option<Fixture> {
        let slot = self.slots.get_mut(id.0)?;
        match std::mem::replace(&mut slot.state, SlotState::Transferred(into)) {
            SlotState::Live(fixture) => Some(fixture),
            previous => {
                slot.state = previous;
                None
            }
        }
    }

    /// Releases one fixture. Returns `Ok(false)` when the slot is not live, so a
    /// second release of the same handle is a no-op.
    pub fn release(&mut self, id: HandleId) -> std::io::Result<bool> {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return Ok(false);
        };
        if !matches!(slot.state, SlotState::Live(_)) {
            return Ok(false);
        }
        match std::mem::replace(&mut slot.state, SlotState::Released) {
            SlotState::Live(fixture) => fixture.release().map(|_| true),
            _ => Ok(false),
        }
    }

    pub fn temp_dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(|d| d.path())
    }

    /// Path of a temp-file fixture.
    pub fn file_path(&self, id: HandleId) -> Option<PathBuf> {
        match self.get(id) {
            Some(Fixture::TempFile(temp)) => Some(temp.file.path().to_path_buf()),
            _ => None,
        }
    }

    /// Current on-disk contents of the named temp-file fixture.
    pub fn file_bytes(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.file_path(self.lookup(name)?)?;
        std::fs::read(path).ok()
    }

    pub fn live_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Live(_)))
            .map(|slot| slot.name.clone())
            .collect()
    }

    pub fn check_leaks(&self) -> Result<(), ResourceLeakError> {
        let fixtures = self.live_names();
        if fixtures.is_empty() && self.dir.is_none() {
            Ok(())
        } else {
            Err(ResourceLeakError { fixtures })
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Releases every live fixture in reverse acquisition order, then removes
    /// the temporary directory. Runs once; later calls release nothing.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            return report;
        }
        self.torn_down = true;

        for index in (0..self.slots.len()).rev() {
            let id = HandleId(index);
            if !self.is_live(id) {
                continue;
            }
            let name = self.slots[index].name.clone();
            match self.release(id) {
                Ok(_) => report.released.push(name),
                Err(e) => {
                    tracing::warn!(case = %self.case_id, fixture = %name, error = %e, "fixture release failed");
                    report.errors.push(format!("{name}: {e}"));
                    report.released.push(name);
                }
            }
        }

        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => report.temp_dir_removed = true,
                Err(e) => {
                    tracing::warn!(case = %self.case_id, error = %e, "temporary directory removal failed");
                    report.errors.push(format!("temp dir: {e}"));
                }
            }
        }
        report
    }
}

impl Drop for FixtureSet {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        let leaked = self.live_names();
        if !leaked.is_empty() {
            tracing::error!(
                case = %self.case_id,
                fixtures = ?leaked,
                "fixture set dropped without teardown"
            );
        }
        self.teardown();
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
