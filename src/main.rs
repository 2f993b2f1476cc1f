use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{CommandFactory, Parser};
use serde_json::Value;

use docx_fieldmap::check::check_json;
use docx_fieldmap::config::{init_default_config, resolve_config, AppConfig, CONFIG_FILE_NAME};
use docx_fieldmap::docx::xml::write_xml_part;
use docx_fieldmap::docx::DocxDocument;
use docx_fieldmap::flatten::flatten_with;
use docx_fieldmap::mapping::{mapping_to_json, parse_mapping_json, VersionedMapping};
use docx_fieldmap::merge::{merge_batch, merge_with, FieldValues, MergeReport};
use docx_fieldmap::store::{merge_template, merge_template_batch, FsTemplateStore, TemplateStore};

#[derive(Parser, Debug)]
#[command(name = "docx-fieldmap")]
#[command(about = "DOCX structural field mapping and mail merge", long_about = None)]
struct Args {
    /// Generate a default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input .docx
    #[arg(value_name = "DOCX")]
    input: Option<PathBuf>,

    /// Output file (.docx for merge/roundtrip, .json for --migrate-mapping)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Config file path (default: search for docx-fieldmap.toml upwards, or DOCX_FIELDMAP_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the addressed HTML projection
    #[arg(long, value_name = "HTML")]
    flatten_html: Option<PathBuf>,

    /// Write the address index JSON (with --flatten-html)
    #[arg(long, value_name = "JSON")]
    address_index: Option<PathBuf>,

    /// Check a stored mapping against the document; exits non-zero when problems are found
    #[arg(long, value_name = "MAPPING")]
    check: Option<PathBuf>,

    /// Mapping JSON for merge
    #[arg(long, value_name = "JSON")]
    mapping: Option<PathBuf>,

    /// Field values JSON object for a single merge
    #[arg(long, value_name = "JSON")]
    values: Option<PathBuf>,

    /// Merge report JSON (default: stderr summary only)
    #[arg(long, value_name = "JSON")]
    report: Option<PathBuf>,

    /// JSON array of value objects; one merged document per row
    #[arg(long, value_name = "JSON")]
    values_batch: Option<PathBuf>,

    /// Output directory for --values-batch
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Rewrite a stored mapping of any supported version at the current schema
    #[arg(long, value_name = "JSON")]
    migrate_mapping: Option<PathBuf>,

    /// Only parse + re-serialize the main document part
    #[arg(long)]
    roundtrip_only: bool,

    /// Store <DOCX> (and --mapping, if given) as a template under the configured [store] root
    #[arg(long, value_name = "ID")]
    save_template: Option<String>,

    /// Merge a stored template with --values or --values-batch; output goes to its merged/ dir
    #[arg(long, value_name = "ID")]
    template: Option<String>,

    /// Name of the merged document for --template (default: merged)
    #[arg(long, value_name = "NAME", default_value = "merged")]
    merged_name: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
    let args = Args::parse();

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let (cfg, cfg_path) = resolve_config(args.config.as_deref(), &workdir)?;
    if let Some(p) = cfg_path.as_ref() {
        log::debug!("using config {}", p.display());
    }

    if let Some(old) = args.migrate_mapping.as_ref() {
        let output = args.output.clone().context("missing -o/--output for --migrate-mapping")?;
        return migrate_mapping_file(old, &output);
    }

    if let Some(template_id) = args.template.as_deref() {
        let store = template_store(&cfg, cfg_path.as_deref())?;
        return merge_stored(&store, template_id, &args, &cfg);
    }

    let input = match args.input.clone() {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  docx-fieldmap <input.docx> --flatten-html out.html\n  docx-fieldmap <input.docx> --mapping mapping.json --values values.json -o merged.docx\n  docx-fieldmap --template invoice --values values.json --merged-name acme\n\nTIPS:\n  - Default config search: {CONFIG_FILE_NAME} (upwards), or set DOCX_FIELDMAP_CONFIG.\n"
            );
            return Ok(());
        }
    };
    let document = read_document(&input, &cfg)?;

    if let Some(template_id) = args.save_template.as_deref() {
        let store = template_store(&cfg, cfg_path.as_deref())?;
        store.save_original(template_id, &document)?;
        if let Some(mapping_path) = args.mapping.as_ref() {
            let text = std::fs::read_to_string(mapping_path)
                .with_context(|| format!("read mapping: {}", mapping_path.display()))?;
            let mapping = parse_mapping_json(&text)
                .with_context(|| format!("parse mapping: {}", mapping_path.display()))?;
            store.save_mapping(template_id, &mapping)?;
        }
        log::info!("Saved template {template_id} under {}", store.root().display());
        return Ok(());
    }

    if args.roundtrip_only {
        let output = args.output.clone().context("missing -o/--output for --roundtrip-only")?;
        let doc = DocxDocument::load(&document)
            .with_context(|| format!("load docx: {}", input.display()))?;
        let xml = write_xml_part(&doc.part)
            .with_context(|| format!("serialize xml: {}", doc.part.name))?;
        let mut replacements = HashMap::new();
        replacements.insert(doc.part.name.clone(), xml);
        doc.package.write_with_replacements(&output, &replacements)?;
        return Ok(());
    }

    if let Some(html_path) = args.flatten_html.as_ref() {
        let out = flatten_with(&document, &cfg.flatten_options())
            .with_context(|| format!("flatten: {}", input.display()))?;
        write_output(html_path, out.html.as_bytes())?;
        if let Some(index_path) = args.address_index.as_ref() {
            let json = serde_json::to_string_pretty(&out.index).context("serialize address index")?;
            write_output(index_path, json.as_bytes())?;
        }
        return Ok(());
    } else if args.address_index.is_some() {
        bail!("--address-index requires --flatten-html");
    }

    if let Some(mapping_path) = args.check.as_ref() {
        let text = std::fs::read_to_string(mapping_path)
            .with_context(|| format!("read mapping: {}", mapping_path.display()))?;
        let report = check_json(&text, &document, cfg.merge_options().verify_element_ids)
            .with_context(|| format!("check mapping: {}", mapping_path.display()))?;
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize check report")?
        );
        if !report.is_clean() {
            std::process::exit(2);
        }
        return Ok(());
    }

    let mapping_path = args
        .mapping
        .as_ref()
        .context("nothing to do: pass --flatten-html, --check, --mapping or --roundtrip-only")?;
    let mapping_text = std::fs::read_to_string(mapping_path)
        .with_context(|| format!("read mapping: {}", mapping_path.display()))?;
    let mapping = parse_mapping_json(&mapping_text)
        .with_context(|| format!("parse mapping: {}", mapping_path.display()))?;
    let options = cfg.merge_options();

    if let Some(batch_path) = args.values_batch.as_ref() {
        let out_dir = args
            .output_dir
            .clone()
            .context("missing --output-dir for --values-batch")?;
        let rows = read_value_rows(batch_path)?;
        let results = merge_batch(&document, &mapping, &rows, &options).context("merge batch")?;
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("create output dir: {}", out_dir.display()))?;
        let mut failed = 0usize;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(out) => {
                    write_output(&out_dir.join(format!("row_{i:04}.docx")), &out.document_bytes)?;
                    let report = serde_json::to_string_pretty(&out.report)
                        .context("serialize merge report")?;
                    write_output(&out_dir.join(format!("row_{i:04}.report.json")), report.as_bytes())?;
                }
                Err(e) => {
                    failed += 1;
                    log::error!("row {i}: {e}");
                }
            }
        }
        if failed > 0 {
            bail!("{failed} of {} rows failed", rows.len());
        }
        return Ok(());
    }

    let values_path = args.values.as_ref().context("missing --values for merge")?;
    let values = field_values_from_json(&read_json(values_path)?)
        .with_context(|| format!("parse values: {}", values_path.display()))?;
    let output = args.output.clone().context("missing -o/--output for merge")?;
    let out = merge_with(&document, &mapping, &values, &options)
        .with_context(|| format!("merge: {}", input.display()))?;
    write_output(&output, &out.document_bytes)?;
    log_report(&out.report);
    if let Some(report_path) = args.report.as_ref() {
        let json = serde_json::to_string_pretty(&out.report).context("serialize merge report")?;
        write_output(report_path, json.as_bytes())?;
    }
    Ok(())
}

fn template_store(cfg: &AppConfig, cfg_path: Option<&Path>) -> anyhow::Result<FsTemplateStore> {
    let root = cfg
        .store_root(cfg_path)
        .context("template store not configured: set [store] root in the config file")?;
    Ok(FsTemplateStore::new(root))
}

/// `--template`: originals pass the size limit when saved, so they are not re-checked here.
fn merge_stored(
    store: &FsTemplateStore,
    template_id: &str,
    args: &Args,
    cfg: &AppConfig,
) -> anyhow::Result<()> {
    let options = cfg.merge_options();
    if let Some(batch_path) = args.values_batch.as_ref() {
        let rows = read_value_rows(batch_path)?;
        let results = merge_template_batch(store, template_id, &rows, &options)?;
        let mut failed = 0usize;
        for result in results {
            match result {
                Ok(report) => log_report(&report),
                Err(e) => {
                    failed += 1;
                    log::error!("{e:#}");
                }
            }
        }
        if failed > 0 {
            bail!("{failed} of {} rows failed", rows.len());
        }
        return Ok(());
    }

    let values_path = args.values.as_ref().context("missing --values for --template")?;
    let values = field_values_from_json(&read_json(values_path)?)
        .with_context(|| format!("parse values: {}", values_path.display()))?;
    let report = merge_template(store, template_id, &args.merged_name, &values, &options)?;
    log_report(&report);
    if let Some(report_path) = args.report.as_ref() {
        let json = serde_json::to_string_pretty(&report).context("serialize merge report")?;
        write_output(report_path, json.as_bytes())?;
    }
    Ok(())
}

fn log_report(report: &MergeReport) {
    for w in &report.warnings {
        log::warn!("{w}");
    }
    for issue in &report.skipped {
        log::warn!("skipped {issue}");
    }
}

fn read_value_rows(path: &Path) -> anyhow::Result<Vec<FieldValues>> {
    match read_json(path)? {
        Value::Array(rows) => rows.iter().map(field_values_from_json).collect(),
        _ => bail!("{}: expected a JSON array of value objects", path.display()),
    }
}

fn read_document(path: &Path, cfg: &AppConfig) -> anyhow::Result<Vec<u8>> {
    let limit = cfg.max_document_bytes();
    let len = std::fs::metadata(path)
        .with_context(|| format!("stat input: {}", path.display()))?
        .len();
    if len > limit {
        bail!(
            "{} is {len} bytes, above max_document_bytes={limit}",
            path.display()
        );
    }
    std::fs::read(path).with_context(|| format!("read input: {}", path.display()))
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read json: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse json: {}", path.display()))
}

fn write_output(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir: {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("write: {}", path.display()))
}

/// Strings pass through, `null` stays absent-valued, numbers and booleans use their JSON text.
fn field_values_from_json(value: &Value) -> anyhow::Result<FieldValues> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("expected a JSON object of field values"))?;
    let mut out = FieldValues::with_capacity(obj.len());
    for (k, v) in obj {
        let v = match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => bail!("field {k}: value must be a string, number, boolean or null"),
        };
        out.insert(k.clone(), v);
    }
    Ok(out)
}

fn migrate_mapping_file(old: &Path, output: &Path) -> anyhow::Result<()> {
    let text =
        std::fs::read_to_string(old).with_context(|| format!("read mapping: {}", old.display()))?;
    let migrated = VersionedMapping::from_json(&text)
        .with_context(|| format!("parse mapping: {}", old.display()))?
        .into_current();
    for orphan in &migrated.orphaned {
        log::warn!(
            "dropping position of unknown field {} at {}",
            orphan.field_name,
            orphan.address
        );
    }
    let json = mapping_to_json(&migrated.mapping).context("serialize mapping")?;
    write_output(output, json.as_bytes())?;
    log::info!(
        "Migrated {} (schema {}) -> {} ({} fields, {} positions, {} orphaned)",
        old.display(),
        migrated.from_version,
        output.display(),
        migrated.mapping.fields.len(),
        migrated.mapping.position_count(),
        migrated.orphaned.len()
    );
    Ok(())
}
