//! ESS Infra CLI
//!
//! Evaluates the stack declaration and prints, renders or diffs it.
//! Provisioning itself is left to the engine that consumes the rendered
//! program.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use ess_core::{Redactor, Secret};
use ess_plan::config::ENV_PREFIX;
use ess_plan::{
    ConfigLoader, ConfigOverrides, Declaration, Format, Program, RealizedState, Resolver,
    declare, diff, preview,
};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ess")]
#[command(about = "ESS infra - private-network Cloud SQL declaration", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Where the stack configuration comes from
#[derive(Args, Debug, Clone, Default)]
struct StackArgs {
    /// YAML stack file
    #[arg(short, long)]
    stack_file: Option<PathBuf>,
    /// Database name
    #[arg(long)]
    db_name: Option<String>,
    /// Database user
    #[arg(long)]
    db_user: Option<String>,
    /// Region
    #[arg(long)]
    region: Option<String>,
}

impl StackArgs {
    fn loader(&self) -> ConfigLoader {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.stack_file {
            loader = loader.stack_file(path);
        }
        loader.env().overrides(&ConfigOverrides {
            db_name: self.db_name.clone(),
            db_user: self.db_user.clone(),
            region: self.region.clone(),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl From<OutputFormat> for Format {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Yaml => Self::Yaml,
            OutputFormat::Json => Self::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the plan in apply order
    Preview {
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Write the engine program
    Render {
        #[command(flatten)]
        stack: StackArgs,
        /// Document format
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
        /// Output path; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print apply waves and dependency edges
    Graph {
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Resolve outputs against realized state
    Outputs {
        #[command(flatten)]
        stack: StackArgs,
        /// JSON state exported from the engine
        #[arg(long)]
        state: PathBuf,
        /// Print secret outputs in plaintext
        #[arg(long)]
        show_secrets: bool,
    },
    /// Compare the declarations of two stack files
    Diff {
        /// Left stack file
        #[arg(long)]
        left: PathBuf,
        /// Right stack file
        #[arg(long)]
        right: PathBuf,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json)?;

    let mut redactor = Redactor::new().with_uri_credentials();
    if let Ok(password) = std::env::var(format!("{}DB_PASSWORD", ENV_PREFIX)) {
        redactor = redactor.with_secret(&Secret::new(password));
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(cli.command, &mut out, &mut redactor).map_err(|err| {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        eyre!("{}", redactor.redact(&chain.join(": ")).as_str())
    })
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .wrap_err_with(|| format!("invalid log level '{}'", level))?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Load one stack and evaluate its declaration, registering the password
/// with the redactor before anything can fail on it
fn evaluate(loader: &ConfigLoader, redactor: &mut Redactor) -> Result<Declaration> {
    let config = loader.load().wrap_err("loading stack configuration")?;
    *redactor = std::mem::take(redactor).with_secret(config.db_password());
    declare(&config).wrap_err("evaluating declaration")
}

fn run(command: Commands, out: &mut impl Write, redactor: &mut Redactor) -> Result<()> {
    match command {
        Commands::Preview { stack } => {
            let declaration = evaluate(&stack.loader(), redactor)?;
            write!(out, "{}", preview(&declaration)?)?;
        }
        Commands::Render {
            stack,
            format,
            output,
        } => {
            let declaration = evaluate(&stack.loader(), redactor)?;
            let document = Program::from_declaration(&declaration)?.render(format.into())?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &document)
                        .wrap_err_with(|| format!("writing {}", path.display()))?;
                    info!(path = %path.display(), bytes = document.len(), "program written");
                }
                None => write!(out, "{}", document)?,
            }
        }
        Commands::Graph { stack } => {
            let declaration = evaluate(&stack.loader(), redactor)?;
            for (i, wave) in declaration.levels()?.iter().enumerate() {
                let names: Vec<&str> = wave.iter().map(|r| r.name.as_str()).collect();
                writeln!(out, "wave {}: {}", i, names.join(", "))?;
            }
            writeln!(out, "edges:")?;
            let dag = declaration.dag();
            for edge in &dag.edges {
                let how = match &edge.kind {
                    ess_plan::EdgeKind::Reference { property } => property.as_str(),
                    ess_plan::EdgeKind::Explicit => "dependsOn",
                };
                writeln!(out, "  {} -> {} ({})", dag.label(edge.from), dag.label(edge.to), how)?;
            }
        }
        Commands::Outputs {
            stack,
            state,
            show_secrets,
        } => {
            let declaration = evaluate(&stack.loader(), redactor)?;
            let state = RealizedState::load(&state)?;
            if show_secrets {
                warn!("printing secret outputs in plaintext");
            }
            for (name, value) in Resolver::new(&state).resolve_all(&declaration)? {
                let text = if show_secrets { value.reveal() } else { value.display() };
                writeln!(out, "{} = {}", name, text)?;
            }
        }
        Commands::Diff { left, right } => {
            let left_loader = ConfigLoader::new().stack_file(&left).env();
            let right_loader = ConfigLoader::new().stack_file(&right).env();
            let before = evaluate(&left_loader, redactor)?;
            let after = evaluate(&right_loader, redactor)?;
            write!(out, "{}", diff(&before, &after))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use figment::Jail;

    fn jailed(test: impl FnOnce(&mut Jail) -> figment::error::Result<()>) {
        Jail::expect_with(|jail| {
            jail.clear_env();
            test(jail)
        });
    }

    fn stack(path: &str) -> StackArgs {
        StackArgs {
            stack_file: Some(PathBuf::from(path)),
            ..StackArgs::default()
        }
    }

    fn run_to_string(command: Commands) -> String {
        let mut out = Vec::new();
        let mut redactor = Redactor::new();
        run(command, &mut out, &mut redactor).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_render_flags() {
        let cli = Cli::parse_from([
            "ess", "render", "--format", "json", "--region", "europe-west1", "-o", "out.json",
        ]);
        let Commands::Render {
            stack,
            format,
            output,
        } = cli.command
        else {
            panic!("expected render");
        };
        assert!(matches!(format, OutputFormat::Json));
        assert_eq!(stack.region.as_deref(), Some("europe-west1"));
        assert_eq!(output, Some(PathBuf::from("out.json")));
        assert_eq!(cli.log_level, "warn");
    }

    #[test]
    fn test_preview_from_env_and_flag() {
        jailed(|jail| {
            jail.set_env("ESS_DB_PASSWORD", "Xq9-env-only-pw");
            jail.set_env("ESS_DB_USER", "svc");
            let cli = Cli::parse_from(["ess", "preview", "--db-name", "orders"]);
            let text = run_to_string(cli.command);
            assert!(text.starts_with("ess-infra (6 resources, 2 outputs) fingerprint "));
            assert!(text.contains("      name: orders\n"));
            assert!(text.contains("      name: svc\n"));
            assert!(text.contains("dbConnectionString: [secret]"));
            assert!(!text.contains("Xq9-env-only-pw"));
            Ok(())
        });
    }

    #[test]
    fn test_flags_beat_env_and_blank_flags_are_ignored() {
        jailed(|jail| {
            jail.create_file("Ess.yaml", "dbName: filedb\nregion: europe-west1\n")?;
            jail.set_env("ESS_DB_PASSWORD", "pw");
            jail.set_env("ESS_DB_NAME", "envdb");
            let cli = Cli::parse_from([
                "ess", "preview", "-s", "Ess.yaml", "--db-name", "", "--region", "asia-east1",
            ]);
            let text = run_to_string(cli.command);
            assert!(text.contains("      name: envdb\n"));
            assert!(text.contains("      region: asia-east1\n"));
            Ok(())
        });
    }

    #[test]
    fn test_render_to_file_hides_password() {
        jailed(|jail| {
            jail.create_file("Ess.dev.yaml", "dbPassword: pl41n-text\n")?;
            run_to_string(Commands::Render {
                stack: stack("Ess.dev.yaml"),
                format: OutputFormat::Yaml,
                output: Some(PathBuf::from("Pulumi.yaml")),
            });
            let document = std::fs::read_to_string("Pulumi.yaml").unwrap();
            assert!(document.contains("fn::secret"));
            assert!(!document.contains("pl41n-text"));
            Ok(())
        });
    }

    #[test]
    fn test_graph_lists_waves() {
        jailed(|jail| {
            jail.create_file("Ess.yaml", "dbPassword: pw\n")?;
            let text = run_to_string(Commands::Graph {
                stack: stack("Ess.yaml"),
            });
            assert!(text.starts_with("wave 0: ess-network\n"));
            assert!(text.contains("ess-sql-conn -> ess-postgres-instance (dependsOn)"));
            Ok(())
        });
    }

    #[test]
    fn test_outputs_redacted_unless_requested() {
        jailed(|jail| {
            jail.create_file("Ess.yaml", "dbPassword: pw-123\n")?;
            jail.create_file(
                "state.json",
                r#"{"resources":{"ess-postgres-instance":{"connectionName":"p:r:i"}}}"#,
            )?;

            let text = run_to_string(Commands::Outputs {
                stack: stack("Ess.yaml"),
                state: PathBuf::from("state.json"),
                show_secrets: false,
            });
            assert!(text.contains("connectionName = p:r:i"));
            assert!(text.contains("dbConnectionString = [secret]"));

            let text = run_to_string(Commands::Outputs {
                stack: stack("Ess.yaml"),
                state: PathBuf::from("state.json"),
                show_secrets: true,
            });
            assert!(text.contains("dbConnectionString = postgresql://essadmin:pw-123@p:r:i/essdb"));
            Ok(())
        });
    }

    #[test]
    fn test_diff_between_stack_files() {
        jailed(|jail| {
            jail.create_file("left.yaml", "dbPassword: pw\n")?;
            jail.create_file("right.yaml", "dbPassword: pw\ndbName: orders\n")?;
            let text = run_to_string(Commands::Diff {
                left: PathBuf::from("left.yaml"),
                right: PathBuf::from("right.yaml"),
            });
            assert!(text.contains("~ ess-database (gcp:sql:Database): name"));
            assert!(text.contains("~ output dbConnectionString"));
            Ok(())
        });
    }

    #[test]
    fn test_missing_password_error_is_reported() {
        jailed(|jail| {
            jail.create_file("Ess.yaml", "dbName: x\n")?;
            let mut redactor = Redactor::new();
            let err = run(
                Commands::Preview {
                    stack: stack("Ess.yaml"),
                },
                &mut Vec::<u8>::new(),
                &mut redactor,
            )
            .unwrap_err();
            let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
            assert!(chain.join(": ").contains("dbPassword"));
            Ok(())
        });
    }
}
