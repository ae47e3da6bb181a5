use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use scenario_migrate_core::{
    schema_file_name, DeclarationValidator, Document, IptiSpIntent, ItnDescription,
    MaxDensCorrection, MigrateOptions, Migrator, PolicyConfig, ReportOnlyAtRisk, SchemaNaming,
    StepRegistry, ValidationReport, Validator, CURRENT_VERSION,
};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "scenario-migrate")]
#[command(about = "Migrate scenario documents to a newer schema version")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate scenario documents (JSON exchange form) to a target version
    Migrate(MigrateArgs),

    /// Print the schema file name associated with a version
    SchemaName {
        /// Schema version
        #[arg(long, default_value_t = CURRENT_VERSION)]
        target: u32,

        /// Schema file naming
        #[arg(long, value_enum, default_value_t = NamingArg::Versioned)]
        naming: NamingArg,
    },

    /// List the registered migration steps
    Steps,
}

#[derive(Args)]
struct MigrateArgs {
    /// Input documents
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for migrated documents (defaults to stdout for a single input)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Version to migrate to
    #[arg(long, default_value_t = CURRENT_VERSION)]
    target: u32,

    /// Point documents at schema.xsd instead of schema_<N>.xsd
    #[arg(long, conflicts_with = "current_schema")]
    latest_schema: bool,

    /// Point documents at schema_current.xsd instead of schema_<N>.xsd
    #[arg(long)]
    current_schema: bool,

    /// Don't validate migrated documents
    #[arg(long)]
    no_validation: bool,

    /// Don't write migrated documents (they are still migrated and validated)
    #[arg(long)]
    no_translation: bool,

    /// Folder holding the schema files used for validation
    #[arg(long, default_value = "schema")]
    schema_folder: PathBuf,

    /// 12 -> 13: whether the max-density bug fix applies when the model doesn't say
    #[arg(long, value_enum)]
    max_dens_correction: Option<MaxDensArg>,

    /// 19 -> 20: whether an IPTi description without interventions was intended
    #[arg(long, value_enum)]
    ipti_sp_option_without_interventions: Option<IptiSpArg>,

    /// 22 -> 23: add REPORT_ONLY_AT_RISK to scenarios using the IPTi SP model
    #[arg(long, value_enum)]
    ipti_report_only_at_risk: Option<OnOffArg>,

    /// 28 -> 29: replace legacy ITN parameters with the default, or keep them for manual editing
    #[arg(long, value_enum)]
    itn_description: Option<ItnArg>,

    /// Rescale to 1-day timesteps after reaching version 18 (disables validation)
    #[arg(long)]
    one_day_timesteps: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,
}

impl MigrateArgs {
    fn naming(&self) -> SchemaNaming {
        if self.latest_schema {
            SchemaNaming::Unversioned
        } else if self.current_schema {
            SchemaNaming::Current
        } else {
            SchemaNaming::Versioned
        }
    }

    fn options(&self) -> MigrateOptions {
        // All fields set explicitly; adding an option must touch this site
        MigrateOptions {
            target_version: self.target,
            naming: self.naming(),
            policy: PolicyConfig {
                max_dens_correction: self.max_dens_correction.map(Into::into),
                ipti_sp_without_interventions: self
                    .ipti_sp_option_without_interventions
                    .map(Into::into),
                ipti_report_only_at_risk: self.ipti_report_only_at_risk.map(Into::into),
                itn_description: self.itn_description.map(Into::into),
            },
            one_day_timesteps: self.one_day_timesteps,
        }
    }

    fn validates(&self) -> bool {
        !self.no_validation && !self.one_day_timesteps
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum NamingArg {
    Versioned,
    Unversioned,
    Current,
}

impl From<NamingArg> for SchemaNaming {
    fn from(val: NamingArg) -> Self {
        match val {
            NamingArg::Versioned => SchemaNaming::Versioned,
            NamingArg::Unversioned => SchemaNaming::Unversioned,
            NamingArg::Current => SchemaNaming::Current,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum MaxDensArg {
    #[value(alias = "true")]
    Apply,
    #[value(alias = "false")]
    PreserveBug,
}

impl From<MaxDensArg> for MaxDensCorrection {
    fn from(val: MaxDensArg) -> Self {
        match val {
            MaxDensArg::Apply => MaxDensCorrection::Apply,
            MaxDensArg::PreserveBug => MaxDensCorrection::PreserveBug,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum IptiSpArg {
    #[value(alias = "true")]
    AssumeIntended,
    #[value(alias = "false")]
    AssumeUnintended,
}

impl From<IptiSpArg> for IptiSpIntent {
    fn from(val: IptiSpArg) -> Self {
        match val {
            IptiSpArg::AssumeIntended => IptiSpIntent::AssumeIntended,
            IptiSpArg::AssumeUnintended => IptiSpIntent::AssumeUnintended,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OnOffArg {
    #[value(alias = "true")]
    On,
    #[value(alias = "false")]
    Off,
}

impl From<OnOffArg> for ReportOnlyAtRisk {
    fn from(val: OnOffArg) -> Self {
        match val {
            OnOffArg::On => ReportOnlyAtRisk::On,
            OnOffArg::Off => ReportOnlyAtRisk::Off,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum ItnArg {
    Replace,
    Manual,
}

impl From<ItnArg> for ItnDescription {
    fn from(val: ItnArg) -> Self {
        match val {
            ItnArg::Replace => ItnDescription::Replace,
            ItnArg::Manual => ItnDescription::Manual,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    Pretty,
    Compact,
}

/// Declaration check that first looks for the schema file in a folder.
///
/// A missing schema file skips validation instead of failing it.
struct SchemaFolderValidator<'a> {
    folder: &'a Path,
    inner: DeclarationValidator,
}

impl Validator for SchemaFolderValidator<'_> {
    fn validate(&self, doc: &Document, schema_file: &str) -> ValidationReport {
        let schema_path = self.folder.join(schema_file);
        if !schema_path.is_file() {
            return ValidationReport::skipped(
                schema_file,
                format!("schema file {} not found", schema_path.display()),
            );
        }
        self.inner.validate(doc, schema_file)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for JSON
    let log_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Migrate(args) => run_migrate(&args)?,
        Commands::SchemaName { target, naming } => {
            println!("{}", schema_file_name(target, naming.into()));
        }
        Commands::Steps => {
            let registry = StepRegistry::standard().context("Step registry is inconsistent")?;
            for step in registry.iter() {
                println!("{:>2} -> {:<2}  {}", step.from, step.to(), step.summary);
            }
        }
    }

    Ok(())
}

fn run_migrate(args: &MigrateArgs) -> Result<()> {
    if args.inputs.len() > 1 && args.output_dir.is_none() && !args.no_translation {
        bail!("Several inputs require --output-dir");
    }

    let migrator = Migrator::new(args.options()).context("Failed to build migrator")?;
    migrator
        .check_target()
        .map_err(|e| anyhow::Error::from(e).context("Invalid target"))?;

    if let Some(dir) = &args.output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    }

    let mut failed = 0;
    for input in &args.inputs {
        if let Err(e) = migrate_file(&migrator, input, args) {
            eprintln!("Error: {}: {e:#}", input.display());
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} documents failed", args.inputs.len());
    }
    Ok(())
}

fn migrate_file(migrator: &Migrator, input: &Path, args: &MigrateArgs) -> Result<()> {
    let mut doc: Document = {
        let file = File::open(input)
            .with_context(|| format!("Failed to open input file: {}", input.display()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse document from: {}", input.display()))?
    };

    let report = migrator.migrate(&mut doc).map_err(|e| {
        debug!(error = %e.to_json(), "migration failed");
        anyhow::Error::from(e).context("Migration failed")
    })?;

    for diagnostic in &report.diagnostics {
        eprintln!("Warning: {}: {diagnostic}", input.display());
    }

    if args.validates() {
        let validator = SchemaFolderValidator {
            folder: &args.schema_folder,
            inner: DeclarationValidator {
                expected_version: report.to_version,
            },
        };
        let validation = validator.validate(&doc, &report.schema_file);
        if let Some(reason) = &validation.skipped {
            eprintln!("Warning: {}: not validating: {reason}", input.display());
        }
        if let Some(issue) = validation.issues.first() {
            bail!(
                "Document does not match {} at {}: {}",
                validation.schema_file,
                issue.path,
                issue.message
            );
        }
    }

    if args.no_translation {
        return Ok(());
    }
    let output = match &args.output_dir {
        Some(dir) => {
            let name = input
                .file_name()
                .with_context(|| format!("Input has no file name: {}", input.display()))?;
            Some(dir.join(name))
        }
        None => None,
    };
    write_json(&doc, output.as_deref(), args.format)?;

    info!(
        input = %input.display(),
        from = report.from_version,
        to = report.to_version,
        "document migrated"
    );
    Ok(())
}

fn write_json<T: serde::Serialize>(val: &T, path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let mut writer: Box<dyn Write> = if let Some(p) = path {
        let file = File::create(p)
            .with_context(|| format!("Failed to create output file: {}", p.display()))?;
        Box::new(BufWriter::new(file))
    } else {
        Box::new(BufWriter::new(io::stdout()))
    };

    match format {
        OutputFormat::Pretty => {
            serde_json::to_writer_pretty(&mut writer, val).context("Failed to write JSON")?;
        }
        OutputFormat::Compact => {
            serde_json::to_writer(&mut writer, val).context("Failed to write JSON")?;
        }
    }

    writeln!(writer).context("Failed to write trailing newline")?;
    writer.flush().context("Failed to flush output")?;

    Ok(())
}
