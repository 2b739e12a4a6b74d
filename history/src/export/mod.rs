//! Build-record export pipeline.
//!
//! Materializes a `.dockerbuild` archive (plus per-build summaries) for
//! a set of build references, either through buildx's native
//! `history export` subcommand or, for older buildx versions, through a
//! FIFO-bridged export-tool container.

mod bridge;
mod container;

pub use bridge::FifoBridge;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dockerbuild_core::config::Settings;
use dockerbuild_core::error::{Error, Result};

use crate::buildx;
use crate::state::Ref;
use crate::summary::{summarize, Summary};

/// Archive filename inside the scratch directory, fixed per call.
pub const EXPORT_FILENAME: &str = "rec.dockerbuild";

/// Summary filename the export tool writes next to the archive.
pub const SUMMARY_FILENAME: &str = "summary.json";

/// Oldest buildx supported by the pipeline, as a comparable pair.
const MIN_SUPPORTED: (u64, u64) = (0, 13);

/// Below this version, finalized records flush asynchronously and a
/// short settle delay is needed before inspect sees them.
const INSPECT_CONSISTENT_VERSION: (u64, u64) = (0, 26);

const FINALIZE_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Options for one export call.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Build references to export (`builder/node/id`), non-empty; all
    /// are taken to share the first reference's builder and node.
    pub refs: Vec<String>,

    /// Export-tool image override (container strategy only).
    pub image: Option<String>,

    /// Force the container strategy even on a buildx with native export.
    pub use_container: bool,

    /// Finalize records (flush trace data) before exporting.
    pub finalize: bool,

    /// Where to place the final archive; the system temp dir by default.
    pub output_dir: Option<PathBuf>,
}

/// Outcome of a successful export.
#[derive(Debug, Clone)]
pub struct ExportResult {
    /// Final archive location, named after the repository and first ref.
    pub dockerbuild_path: PathBuf,

    /// Archive size in bytes.
    pub dockerbuild_size: u64,

    /// Per-reference summaries, keyed by full build reference.
    pub summaries: BTreeMap<String, Summary>,

    pub builder_name: String,
    pub node_name: String,

    /// Exported build ids (the id component of each reference).
    pub refs: Vec<String>,
}

/// Export build records into a `.dockerbuild` archive.
///
/// # Errors
///
/// Fails fast, before spawning anything, on an unsupported platform or
/// an empty/malformed reference list; then on a missing container
/// runtime or a too-old buildx. Any subprocess failure aborts the whole
/// call after spawned children are cleaned up; there is no
/// partial-success result.
pub async fn export(opts: ExportOptions) -> Result<ExportResult> {
    if cfg!(windows) {
        return Err(Error::UnsupportedPlatform("windows".to_string()));
    }
    if opts.refs.is_empty() {
        return Err(Error::Export("no build references to export".to_string()));
    }
    let parsed: Vec<Ref> = opts
        .refs
        .iter()
        .map(|r| Ref::parse(r))
        .collect::<Result<_>>()?;

    buildx::docker_available().await?;
    let version = buildx::version().await?;
    if !version.at_least(MIN_SUPPORTED.0, MIN_SUPPORTED.1) {
        return Err(Error::UnsupportedVersion {
            found: version.raw.clone(),
            minimum: buildx::MIN_VERSION.to_string(),
        });
    }

    // All references share one builder and node, taken from the first
    let builder_name = parsed[0].builder.clone();
    let node_name = parsed[0].node.clone();
    let ids: Vec<String> = parsed.iter().map(|r| r.id.clone()).collect();

    let settings = Settings::from_env();
    let scratch = tempfile::tempdir()?;
    let scratch_archive = scratch.path().join(EXPORT_FILENAME);

    let native = !opts.use_container
        && version.at_least(buildx::NATIVE_EXPORT_VERSION.0, buildx::NATIVE_EXPORT_VERSION.1);

    let summaries = if native {
        tracing::info!(
            builder = %builder_name,
            refs = ids.len(),
            "Exporting build records natively"
        );
        let mut command =
            buildx::history_export_command(&builder_name, &ids, &scratch_archive, opts.finalize);
        buildx::run_output(&mut command).await?;

        if opts.finalize
            && !version.at_least(INSPECT_CONSISTENT_VERSION.0, INSPECT_CONSISTENT_VERSION.1)
        {
            tokio::time::sleep(FINALIZE_SETTLE_DELAY).await;
        }

        let mut summaries = BTreeMap::new();
        for (reference, id) in opts.refs.iter().zip(&ids) {
            let response = buildx::inspect(&builder_name, id).await?;
            summaries.insert(reference.clone(), summarize(&response));
        }
        summaries
    } else {
        tracing::info!(
            builder = %builder_name,
            refs = ids.len(),
            image = %settings.export_image,
            "Exporting build records through the export-tool container"
        );
        let refs_dir = settings.refs_dir();
        let request = container::ContainerExport {
            image: opts.image.as_deref().unwrap_or(&settings.export_image),
            builder: &builder_name,
            node: &node_name,
            ids: &ids,
            refs_dir: &refs_dir,
            scratch_dir: scratch.path(),
        };
        container::export_via_container(&request).await?;
        read_summaries(&scratch.path().join(SUMMARY_FILENAME))?
    };

    if !scratch_archive.exists() {
        return Err(Error::Export(format!(
            "export produced no archive at {}",
            scratch_archive.display()
        )));
    }

    let filename = export_filename(settings.repository.as_deref(), &ids);
    let output_dir = opts
        .output_dir
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&output_dir)?;
    let dockerbuild_path = output_dir.join(&filename);
    move_file(&scratch_archive, &dockerbuild_path)?;
    let dockerbuild_size = std::fs::metadata(&dockerbuild_path)?.len();

    tracing::info!(
        path = %dockerbuild_path.display(),
        size = dockerbuild_size,
        "Build records exported"
    );

    Ok(ExportResult {
        dockerbuild_path,
        dockerbuild_size,
        summaries,
        builder_name,
        node_name,
        refs: ids,
    })
}

/// Derive the archive filename from the repository and exported ids.
///
/// `<owner>~<repo>~<ID6>.dockerbuild`, where `ID6` is the first six
/// characters of the first id uppercased, with a `+<N-1>` suffix when
/// more than one build is exported. Short, readable and
/// collision-resistant without encoding full digests.
fn export_filename(repository: Option<&str>, ids: &[String]) -> String {
    let repo = repository.unwrap_or("unknown/unknown");
    let mut name = repo.replace('/', "~");
    let id = ids.first().map(String::as_str).unwrap_or_default();
    let short: String = id.chars().take(6).collect::<String>().to_uppercase();
    name.push('~');
    name.push_str(&short);
    if ids.len() > 1 {
        name.push('+');
        name.push_str(&(ids.len() - 1).to_string());
    }
    name.push_str(".dockerbuild");
    name
}

/// Parse a `summary.json` written by the export tool.
///
/// A missing file is not an error; older export tools only write the
/// archive.
fn read_summaries(path: &Path) -> Result<BTreeMap<String, Summary>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path)?;
    let summaries: BTreeMap<String, Summary> = serde_json::from_str(&content)?;
    Ok(summaries)
}

/// Move a file, falling back to copy+remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}
