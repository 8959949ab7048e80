use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::OcrError;

/// Environment variable that may point directly at the tesseract binary.
pub const TESSERACT_CMD_ENV: &str = "TESSERACT_CMD";

/// Standard install locations checked when tesseract is not on PATH.
const COMMON_INSTALL_PATHS: [&str; 4] = [
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
];

/// Resolved engine locations.
#[derive(Clone, Debug)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    /// `None` means the engine's compiled-in tessdata location is used.
    pub tessdata: Option<PathBuf>,
}

/// Locates the engine and its language data.
///
/// Fails with `EngineUnavailable` when no runnable binary is found; callers
/// report this rather than retrying.
pub fn locate_tesseract(explicit: Option<&Path>, language: &str) -> Result<TesseractPaths, OcrError> {
    let executable = find_tesseract_executable(explicit)?;
    let tessdata = find_tessdata_dir(language);
    info!(
        "Tesseract at {} (tessdata: {})",
        executable.display(),
        tessdata
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "engine default".to_string())
    );
    Ok(TesseractPaths {
        executable,
        tessdata,
    })
}

/// Finds the tesseract executable: explicit path, env override, local data
/// dir, PATH, then the common install locations.
pub fn find_tesseract_executable(explicit: Option<&Path>) -> Result<PathBuf, OcrError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(OcrError::EngineUnavailable(format!(
            "configured tesseract path {} does not exist",
            path.display()
        )));
    }

    if let Ok(cmd) = std::env::var(TESSERACT_CMD_ENV) {
        let p = PathBuf::from(cmd);
        if p.exists() {
            return Ok(p);
        }
        debug!("{} points at missing file {}", TESSERACT_CMD_ENV, p.display());
    }

    let local_dir = crate::paths::get_tesseract_dir();
    for name in ["tesseract", "tesseract.exe"] {
        let local_exe = local_dir.join(name);
        if local_exe.exists() {
            return Ok(local_exe);
        }
    }

    if responds_to_version(Path::new("tesseract")) {
        return Ok(PathBuf::from("tesseract"));
    }

    for path in &COMMON_INSTALL_PATHS {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    Err(OcrError::EngineUnavailable(
        "tesseract not found; install Tesseract-OCR or set TESSERACT_CMD".to_string(),
    ))
}

/// Finds a tessdata directory containing `<language>.traineddata`.
pub fn find_tessdata_dir(language: &str) -> Option<PathBuf> {
    let traineddata = format!("{}.traineddata", language);

    let local_tessdata = crate::paths::get_tesseract_dir().join("tessdata");
    if local_tessdata.join(&traineddata).exists() {
        return Some(local_tessdata);
    }

    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let p = PathBuf::from(&prefix);
        if p.join(&traineddata).exists() {
            return Some(p);
        }
        let p = p.join("tessdata");
        if p.join(&traineddata).exists() {
            return Some(p);
        }
    }

    None
}

fn responds_to_version(exe: &Path) -> bool {
    Command::new(exe)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
