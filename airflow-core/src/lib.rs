use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use log::{error, info};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

pub mod buildings;
pub mod checker;
pub mod editor;
pub mod exec;
pub mod gate;
pub mod grid;
pub mod il;
pub mod listing;
pub mod matcher;
pub mod occupier;
pub mod options;
pub mod patches;
pub mod transpiler;

pub use checker::AirflowTileLiquidChecker;
pub use gate::HookGate;
pub use options::Options;
pub use patches::ModPatches;
pub use transpiler::{transpile_on_spawn, TranspileOutcome, ON_SPAWN_HOOK};

use listing::{parse_listing, to_listing, ListingError};

#[derive(Debug, Error)]
pub enum AirflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("listing error: {0}")]
    Listing(#[from] ListingError),
    #[error("{}: {source}", .path.display())]
    ListingFile {
        path: PathBuf,
        #[source]
        source: ListingError,
    },
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AirflowError>;

#[derive(Debug, Clone)]
pub struct PatchSettings {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Method reference the inserted guard calls.
    pub hook: String,
    pub options: Options,
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub relative: PathBuf,
    pub outcome: TranspileOutcome,
}

fn is_listing_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".il") || name.ends_with(".il.gz")
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |e| e.eq_ignore_ascii_case("gz"))
}

fn method_name_for(path: &Path) -> String {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("method");
    name.trim_end_matches(".gz").trim_end_matches(".il").to_string()
}

fn read_listing_text(path: &Path) -> Result<String> {
    let raw = fs::read(path)?;
    if is_gzip(path) {
        let mut decoder = GzDecoder::new(&raw[..]);
        let mut text = String::new();
        decoder.read_to_string(&mut text)?;
        Ok(text)
    } else {
        String::from_utf8(raw).map_err(|e| {
            AirflowError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not valid UTF-8: {}", path.display(), e.utf8_error()),
            ))
        })
    }
}

fn write_listing_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes())?;
        fs::write(path, encoder.finish()?)?;
    } else {
        fs::write(path, text)?;
    }
    Ok(())
}

/// Collect `(source, relative)` pairs. A single file maps to itself; a
/// directory is walked for `*.il` and `*.il.gz` files.
fn collect_inputs(input: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    if input.is_file() {
        let relative = input
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| AirflowError::Config(format!("bad input path {}", input.display())))?;
        return Ok(vec![(input.to_path_buf(), relative)]);
    }
    if !input.is_dir() {
        return Err(AirflowError::Config(format!(
            "input {} does not exist",
            input.display()
        )));
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(input).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_listing_file(entry.path()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(input)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(entry.file_name()));
        out.push((entry.path().to_path_buf(), relative));
    }
    Ok(out)
}

/// Transpile one listing file, writing the result to `dest`.
pub fn patch_file(source: &Path, dest: &Path, patches: &ModPatches) -> Result<TranspileOutcome> {
    let text = read_listing_text(source)?;
    let body = parse_listing(&method_name_for(source), &text).map_err(|e| {
        AirflowError::ListingFile {
            path: source.to_path_buf(),
            source: e,
        }
    })?;
    let (patched, outcome) = patches.transpile_on_spawn(body);
    write_listing_text(dest, &to_listing(&patched))?;
    Ok(outcome)
}

/// Patch every listing under `settings.input_path`.
///
/// When the input is a directory, the output is a directory mirroring it;
/// otherwise the output is the destination file. A listing without the
/// subscription tail is still written, unmodified.
pub fn run(settings: &PatchSettings) -> Result<Vec<FileReport>> {
    let patches = ModPatches::prepare(&settings.options).with_hook(&settings.hook)?;
    let inputs = collect_inputs(&settings.input_path)?;
    if inputs.is_empty() {
        return Err(AirflowError::Config(format!(
            "no .il listings under {}",
            settings.input_path.display()
        )));
    }

    let single = settings.input_path.is_file();
    let mut reports = Vec::new();

    for (source, relative) in inputs {
        let dest = if single {
            settings.output_path.clone()
        } else {
            settings.output_path.join(&relative)
        };

        let outcome = match patch_file(&source, &dest, &patches) {
            Ok(o) => o,
            Err(e) => {
                error!("failed on {}: {}", source.display(), e);
                return Err(e);
            }
        };
        info!("{}: {}", relative.display(), describe(&outcome));
        reports.push(FileReport { relative, outcome });
    }

    if settings.debug {
        let report_dir = if single {
            settings
                .output_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()
        } else {
            settings.output_path.clone()
        };
        let mut log = format!("hook: {}\n", patches.hook());
        for name in patches.active() {
            log.push_str(&format!("patch: {}\n", name));
        }
        for r in &reports {
            log.push_str(&format!("{}: {}\n", r.relative.display(), describe(&r.outcome)));
        }
        fs::create_dir_all(&report_dir)?;
        fs::write(report_dir.join("patch_report.txt"), log)?;
    }

    Ok(reports)
}

pub fn describe(outcome: &TranspileOutcome) -> String {
    match outcome {
        TranspileOutcome::Patched { site, .. } => format!("patched at {}", site),
        TranspileOutcome::NotFound => "pattern not found (left unmodified)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupier::SIM_CELL_OCCUPIER_ON_SPAWN;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("airflow-run-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn patches_a_directory_of_listings() {
        let root = scratch("dir");
        let input = root.join("in");
        fs::create_dir_all(input.join("nested")).unwrap();
        fs::write(input.join("OnSpawn.il"), SIM_CELL_OCCUPIER_ON_SPAWN).unwrap();
        fs::write(input.join("nested").join("Other.il"), "ldarg.0\npop\nret\n").unwrap();
        fs::write(input.join("notes.txt"), "ignored").unwrap();
        write_listing_text(&input.join("Packed.il.gz"), SIM_CELL_OCCUPIER_ON_SPAWN).unwrap();

        let settings = PatchSettings {
            input_path: input.clone(),
            output_path: root.join("out"),
            hook: ON_SPAWN_HOOK.to_string(),
            options: Options::default(),
            debug: true,
        };
        let reports = run(&settings).unwrap();

        assert_eq!(reports.len(), 3);
        let patched: Vec<_> = reports.iter().filter(|r| r.outcome.is_patched()).collect();
        assert_eq!(patched.len(), 2);

        let text = fs::read_to_string(root.join("out").join("OnSpawn.il")).unwrap();
        assert!(text.contains(ON_SPAWN_HOOK));
        let packed = read_listing_text(&root.join("out").join("Packed.il.gz")).unwrap();
        assert!(packed.contains(ON_SPAWN_HOOK));
        let other = fs::read_to_string(root.join("out").join("nested").join("Other.il")).unwrap();
        assert!(!other.contains(ON_SPAWN_HOOK));
        let report = fs::read_to_string(root.join("out").join("patch_report.txt")).unwrap();
        assert!(report.contains("SolarPanelConfig.DoPostConfigureComplete"));
        assert!(!root.join("out").join("notes.txt").exists());
    }

    #[test]
    fn parse_errors_name_the_file() {
        let root = scratch("bad");
        let path = root.join("Bad.il");
        fs::write(&path, "frobnicate\n").unwrap();
        let patches = ModPatches::prepare(&Options::default());
        let err = patch_file(&path, &root.join("out.il"), &patches).unwrap_err();
        assert!(matches!(err, AirflowError::ListingFile { .. }));
        assert!(err.to_string().contains("Bad.il"));
    }

    #[test]
    fn empty_directory_is_a_config_error() {
        let root = scratch("empty");
        let settings = PatchSettings {
            input_path: root.clone(),
            output_path: root.join("out"),
            hook: ON_SPAWN_HOOK.to_string(),
            options: Options::default(),
            debug: false,
        };
        assert!(matches!(run(&settings), Err(AirflowError::Config(_))));
    }

    #[test]
    fn invalid_utf8_is_rejected_not_replaced() {
        let root = scratch("utf8");
        let path = root.join("Latin1.il");
        fs::write(&path, b"ldsfld \"Caf\xE9 Field\"\npop\nret\n").unwrap();
        let out = root.join("Latin1.out.il");

        let patches = ModPatches::prepare(&Options::default());
        let err = patch_file(&path, &out, &patches).unwrap_err();
        match err {
            AirflowError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!out.exists());
    }

    #[test]
    fn quoted_hook_is_refused_before_anything_is_written() {
        let root = scratch("hook");
        let input = root.join("OnSpawn.il");
        fs::write(&input, SIM_CELL_OCCUPIER_ON_SPAWN).unwrap();
        let settings = PatchSettings {
            input_path: input,
            output_path: root.join("OnSpawn.out.il"),
            hook: "Boolean \"Q\"::Hook()".to_string(),
            options: Options::default(),
            debug: false,
        };
        assert!(matches!(run(&settings), Err(AirflowError::Config(_))));
        assert!(!settings.output_path.exists());
    }

    #[test]
    fn patched_output_reads_back() {
        let root = scratch("reread");
        let input = root.join("OnSpawn.il");
        fs::write(&input, SIM_CELL_OCCUPIER_ON_SPAWN).unwrap();
        let settings = PatchSettings {
            input_path: input,
            output_path: root.join("OnSpawn.out.il"),
            hook: "Boolean Other::Hook(Int32[], System.String)".to_string(),
            options: Options::default(),
            debug: false,
        };
        let reports = run(&settings).unwrap();
        assert!(reports[0].outcome.is_patched());

        let text = fs::read_to_string(&settings.output_path).unwrap();
        let body = parse_listing("OnSpawn", &text).unwrap();
        body.validate().unwrap();
        assert!(body
            .instructions()
            .iter()
            .any(|i| i.operand.text().as_deref() == Some(settings.hook.as_str())));
    }
}
