use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use platemaker::config::{self, EngineConfig};
use platemaker::export::{self, BatchReport, Exporter, JpegExporter, PngExporter};
use platemaker::fonts::{AssetFontSource, FontLibrary};
use platemaker::layout;
use platemaker::package;
use platemaker::raster::{OutputFormat, SoftwareRasterizer};
use platemaker::render::{LayerFilter, RenderEnv, Renderer};
use platemaker::{ContentStore, GeneratorRegistry, Record, Resolver, Template};

#[derive(Parser)]
#[command(name = "platemaker")]
#[command(about = "Template-driven batch image renderer")]
#[command(long_about = "\
Template-driven batch image renderer

A template package (zip or directory) defines a canvas and an element
tree; a records file supplies one JSON object per instantiation. Each
record produces one raster image, exportable individually, as a zip
bundle, or tiled onto print-ready sheets.

Package layout:

  badge.zip
  ├── template.json                # canvas, elements, variables
  └── assets/
      ├── logo.png                 # referenced as content://logo.png
      └── fonts/inter-400.ttf      # picked up by family/weight lookup

Records file:

  [
    { \"name\": \"Ada Lovelace\", \"role\": \"Engineer\" },
    { \"name\": \"Grace Hopper\", \"role\": \"Admiral\" }
  ]

Template text values use {field} interpolation against each record.
Run 'platemaker gen-config' to print a documented platemaker.toml.")]
#[command(version)]
struct Cli {
    /// Config file directory (looks for platemaker.toml)
    #[arg(long, default_value = ".", global = true)]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a template package summary
    Inspect {
        /// Package zip or directory
        package: PathBuf,
    },
    /// Render one image per record
    Export {
        /// Package zip or directory
        package: PathBuf,
        /// JSON file with an array of records
        #[arg(long)]
        records: PathBuf,
        /// Output directory for individual files
        #[arg(long, default_value = "out")]
        out: PathBuf,
        /// Write a single zip bundle instead of individual files
        #[arg(long)]
        bundle: Option<PathBuf>,
        /// Output format (overrides config)
        #[arg(long)]
        format: Option<String>,
        /// Filename format, e.g. "{name}-{index}" (overrides config)
        #[arg(long)]
        filename: Option<String>,
        /// Layer filter: all | dynamic | static
        #[arg(long, default_value = "all")]
        filter: String,
        /// Output scale factor (overrides config)
        #[arg(long)]
        scale: Option<f32>,
    },
    /// Render records and tile them onto print-ready sheets
    Sheet {
        /// Package zip or directory
        package: PathBuf,
        /// JSON file with an array of records
        #[arg(long)]
        records: PathBuf,
        /// Output directory for sheet PNGs
        #[arg(long, default_value = "out")]
        out: PathBuf,
        /// Page preset (overrides config)
        #[arg(long)]
        page: Option<String>,
        /// Draw cutting guides around tiles
        #[arg(long)]
        outline: bool,
    },
    /// Print a stock platemaker.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load_or_default(&cli.config_dir)?;

    match cli.command {
        Command::Inspect { package } => {
            let mut store = ContentStore::new();
            let template = load_template(&package, &mut store)?;
            println!("{} (v{})", template.name, template.version);
            println!(
                "  canvas:   {}x{}{}",
                template.canvas.width,
                template.canvas.height,
                template
                    .canvas
                    .background
                    .as_deref()
                    .map(|b| format!(", background {b}"))
                    .unwrap_or_default()
            );
            println!("  elements: {}", template.element_count());
            println!("  assets:   {}", store.len());
            for name in store.names() {
                println!("    {name}");
            }
            println!("  identity: {}", &template.identity_hash()[..16]);
        }
        Command::Export {
            package,
            records,
            out,
            bundle,
            format,
            filename,
            filter,
            scale,
        } => {
            let mut store = ContentStore::new();
            let template = load_template(&package, &mut store)?;
            let records = load_records(&records)?;
            let filter = parse_filter(&filter)?;

            let format = match format.as_deref() {
                Some("png") => OutputFormat::Png,
                Some("jpeg") | Some("jpg") => OutputFormat::Jpeg,
                Some(other) => return Err(format!("unknown format: {other}").into()),
                None => config.export.format,
            };
            let filename_format = filename.unwrap_or_else(|| config.export.filename.clone());

            let mut options = platemaker::ExportOptions {
                scale: scale.unwrap_or(config.export.scale),
                ..Default::default()
            };
            let exporter: Box<dyn Exporter<SoftwareRasterizer>> = match format {
                OutputFormat::Png => Box::new(PngExporter),
                OutputFormat::Jpeg => {
                    options
                        .extra
                        .insert("quality".to_string(), config.export.quality.to_string());
                    Box::new(JpegExporter)
                }
            };

            let report = run_batch(
                &template,
                &store,
                &records,
                exporter.as_ref(),
                &filename_format,
                &options,
                filter,
            )?;
            report_failures(&report);

            if let Some(bundle_path) = bundle {
                let bytes = export::bundle_zip(&report.items)?;
                std::fs::write(&bundle_path, bytes)?;
                println!("{} exports → {}", report.items.len(), bundle_path.display());
            } else {
                std::fs::create_dir_all(&out)?;
                for item in &report.items {
                    std::fs::write(out.join(&item.filename), &item.bytes)?;
                }
                println!("{} exports → {}", report.items.len(), out.display());
            }
        }
        Command::Sheet {
            package,
            records,
            out,
            page,
            outline,
        } => {
            let mut store = ContentStore::new();
            let template = load_template(&package, &mut store)?;
            let records = load_records(&records)?;

            let page_size = match page {
                Some(name) => layout::PageSize::preset(&name)
                    .ok_or_else(|| format!("unknown page preset: {name}"))?,
                None => config.sheet.page_size()?,
            };

            let options = platemaker::ExportOptions::default();
            let report = run_batch(
                &template,
                &store,
                &records,
                &PngExporter,
                &config.export.filename,
                &options,
                LayerFilter::All,
            )?;
            report_failures(&report);

            let sheets = layout::generate_sheets(
                &report.items,
                page_size,
                config.sheet.margin,
                config.sheet.spacing,
                1.0,
                outline || config.sheet.outline,
            )?;

            std::fs::create_dir_all(&out)?;
            for sheet in &sheets {
                std::fs::write(out.join(&sheet.filename), &sheet.bytes)?;
            }
            println!(
                "{} records on {} sheets → {}",
                report.items.len(),
                sheets.len(),
                out.display()
            );
        }
        Command::GenConfig => {
            print!("{}", config::stock_config());
        }
    }

    Ok(())
}

fn load_template(path: &Path, store: &mut ContentStore) -> Result<Template, package::PackageError> {
    if path.is_dir() {
        package::load_package_dir(path, store)
    } else {
        package::load_package_path(path, store)
    }
}

/// Records are JSON objects; non-string values are stringified so numeric
/// columns interpolate naturally.
fn load_records(path: &Path) -> Result<Vec<Record>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let raw: Vec<BTreeMap<String, serde_json::Value>> = serde_json::from_str(&content)?;
    Ok(raw
        .into_iter()
        .map(|record| {
            record
                .into_iter()
                .map(|(key, value)| {
                    let text = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, text)
                })
                .collect()
        })
        .collect())
}

fn parse_filter(name: &str) -> Result<LayerFilter, String> {
    match name {
        "all" => Ok(LayerFilter::All),
        "dynamic" => Ok(LayerFilter::DynamicOnly),
        "static" => Ok(LayerFilter::StaticOnly),
        other => Err(format!("unknown filter: {other} (all | dynamic | static)")),
    }
}

fn run_batch(
    template: &Template,
    store: &ContentStore,
    records: &[Record],
    exporter: &dyn Exporter<SoftwareRasterizer>,
    filename_format: &str,
    options: &platemaker::ExportOptions,
    filter: LayerFilter,
) -> Result<BatchReport, export::ExportError> {
    let mut fonts = FontLibrary::new(Box::new(AssetFontSource));
    if let Some(fallback) = first_package_font(store) {
        fonts.set_fallback(fallback);
    }
    let backend = SoftwareRasterizer::new(fonts);
    let mut renderer = Renderer::new(backend);

    let resolver = Resolver::with_defaults();
    let generators = GeneratorRegistry::with_builtins();
    let env = RenderEnv { store, resolver: &resolver, generators: &generators };

    let raw_values = template.default_values();
    let mut pipeline = platemaker::ExportPipeline::new(&mut renderer, env);
    pipeline.export_batch(
        Some(template),
        records,
        &raw_values,
        exporter,
        filename_format,
        options,
        Some(filter),
    )
}

fn report_failures(report: &BatchReport) {
    for failure in &report.failures {
        eprintln!("record {} failed: {}", failure.index + 1, failure.error);
    }
}

/// Seed the fallback face from any font shipped in the package so text
/// renders even for unmatched families.
fn first_package_font(store: &ContentStore) -> Option<ab_glyph::FontArc> {
    store
        .names()
        .filter(|name| {
            name.starts_with("fonts/") && (name.ends_with(".ttf") || name.ends_with(".otf"))
        })
        .find_map(|name| {
            let bytes = store.get(name)?;
            ab_glyph::FontArc::try_from_vec(bytes.as_ref().clone()).ok()
        })
}
