//! Per-upload artifacts produced outside the pipeline (the converted drawing,
//! OCR text, the source document) and the intermediate files it writes back.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::{
    error::{Result, TakeoffError},
    record::ArtifactRef,
    store::validate_upload_id,
    types::Drawing,
};

pub const DRAWING_FILE: &str = "drawing.json";
pub const OCR_FILE: &str = "ocr.txt";
const SOURCE_PREFIX: &str = "source.";
const STAGES_DIR: &str = "stages";

pub trait ArtifactStore: Send + Sync {
    /// The converted drawing, `None` when conversion has not produced one
    fn load_drawing(&self, upload_id: &str) -> Result<Option<Drawing>>;

    /// Overwrite the drawing with the latest committed state
    fn save_drawing(&self, upload_id: &str, drawing: &Drawing) -> Result<ArtifactRef>;

    fn drawing_ref(&self, upload_id: &str) -> Result<Option<ArtifactRef>>;

    fn load_ocr_text(&self, upload_id: &str) -> Result<Option<String>>;

    fn source_document(&self, upload_id: &str) -> Result<Option<ArtifactRef>>;

    /// Store an intermediate stage output and return where it went
    fn write_stage_artifact(&self, upload_id: &str, file_name: &str, bytes: &[u8]) -> Result<String>;
}

/// Directory layout: `<root>/<upload_id>/{drawing.json, ocr.txt, source.*, stages/}`
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn upload_dir(&self, upload_id: &str) -> Result<PathBuf> {
        validate_upload_id(upload_id)?;
        Ok(self.root.join(upload_id))
    }

    fn file_ref(path: &Path) -> Result<Option<ArtifactRef>> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(Some(ArtifactRef {
                path: path.display().to_string(),
                size_bytes: meta.len(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl ArtifactStore for FileArtifactStore {
    fn load_drawing(&self, upload_id: &str) -> Result<Option<Drawing>> {
        let path = self.upload_dir(upload_id)?.join(DRAWING_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        Drawing::load(path).map(Some)
    }

    fn save_drawing(&self, upload_id: &str, drawing: &Drawing) -> Result<ArtifactRef> {
        let dir = self.upload_dir(upload_id)?;
        fs::create_dir_all(&dir)?;
        let path = dir.join(DRAWING_FILE);
        drawing.save(&path)?;
        Self::file_ref(&path)?
            .ok_or_else(|| TakeoffError::StoreUnavailable(format!("{} vanished after write", path.display())))
    }

    fn drawing_ref(&self, upload_id: &str) -> Result<Option<ArtifactRef>> {
        Self::file_ref(&self.upload_dir(upload_id)?.join(DRAWING_FILE))
    }

    fn load_ocr_text(&self, upload_id: &str) -> Result<Option<String>> {
        let path = self.upload_dir(upload_id)?.join(OCR_FILE);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn source_document(&self, upload_id: &str) -> Result<Option<ArtifactRef>> {
        let dir = self.upload_dir(upload_id)?;
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut candidates: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(SOURCE_PREFIX))
            })
            .collect();
        candidates.sort();
        match candidates.first() {
            Some(path) => Self::file_ref(path),
            None => Ok(None),
        }
    }

    fn write_stage_artifact(&self, upload_id: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        validate_upload_id(file_name)?;
        let dir = self.upload_dir(upload_id)?.join(STAGES_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(file_name);
        fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }
}

#[derive(Debug, Default, Clone)]
struct MemoryUpload {
    drawing: Option<Drawing>,
    ocr_text: Option<String>,
    source: Option<ArtifactRef>,
    stage_files: BTreeMap<String, Vec<u8>>,
}

/// In-process artifact store for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    uploads: Mutex<HashMap<String, MemoryUpload>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_upload<T>(&self, upload_id: &str, f: impl FnOnce(&mut MemoryUpload) -> T) -> Result<T> {
        validate_upload_id(upload_id)?;
        let mut uploads = self
            .uploads
            .lock()
            .map_err(|_| TakeoffError::StoreUnavailable("artifact map lock poisoned".into()))?;
        Ok(f(uploads.entry(upload_id.to_string()).or_default()))
    }

    pub fn insert_drawing(&self, upload_id: &str, drawing: Drawing) -> Result<()> {
        self.with_upload(upload_id, |upload| upload.drawing = Some(drawing))
    }

    pub fn insert_ocr_text(&self, upload_id: &str, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.with_upload(upload_id, |upload| upload.ocr_text = Some(text))
    }

    pub fn insert_source(&self, upload_id: &str, source: ArtifactRef) -> Result<()> {
        self.with_upload(upload_id, |upload| upload.source = Some(source))
    }

    pub fn stage_file(&self, upload_id: &str, file_name: &str) -> Result<Option<Vec<u8>>> {
        self.with_upload(upload_id, |upload| upload.stage_files.get(file_name).cloned())
    }
}

fn memory_ref(upload_id: &str, name: &str, size_bytes: u64) -> ArtifactRef {
    ArtifactRef {
        path: format!("memory://{upload_id}/{name}"),
        size_bytes,
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn load_drawing(&self, upload_id: &str) -> Result<Option<Drawing>> {
        self.with_upload(upload_id, |upload| upload.drawing.clone())
    }

    fn save_drawing(&self, upload_id: &str, drawing: &Drawing) -> Result<ArtifactRef> {
        let size = drawing.to_json()?.len() as u64;
        self.with_upload(upload_id, |upload| upload.drawing = Some(drawing.clone()))?;
        Ok(memory_ref(upload_id, DRAWING_FILE, size))
    }

    fn drawing_ref(&self, upload_id: &str) -> Result<Option<ArtifactRef>> {
        match self.load_drawing(upload_id)? {
            Some(drawing) => Ok(Some(memory_ref(upload_id, DRAWING_FILE, drawing.to_json()?.len() as u64))),
            None => Ok(None),
        }
    }

    fn load_ocr_text(&self, upload_id: &str) -> Result<Option<String>> {
        self.with_upload(upload_id, |upload| upload.ocr_text.clone())
    }

    fn source_document(&self, upload_id: &str) -> Result<Option<ArtifactRef>> {
        self.with_upload(upload_id, |upload| upload.source.clone())
    }

    fn write_stage_artifact(&self, upload_id: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        let bytes = bytes.to_vec();
        self.with_upload(upload_id, |upload| {
            upload.stage_files.insert(file_name.to_string(), bytes);
        })?;
        Ok(format!("memory://{upload_id}/{STAGES_DIR}/{file_name}"))
    }
}
