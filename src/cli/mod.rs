mod config;
mod handlers;

use crate::error::{FormError, Result};
use crate::EngineOptions;
use clap::{Arg, ArgAction, Command, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub struct FieldflowCli {
    config: config::ConfigFile,
}

impl FieldflowCli {
    pub fn new() -> Self {
        Self {
            config: config::ConfigFile::default(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let matches = self.build_cli().get_matches();

        if let Some(config_path) = matches.get_one::<String>("config") {
            self.config = config::load(config_path)?;
        }

        self.setup_logging(matches.get_count("verbose"));

        match matches.subcommand() {
            Some(("check", sub_matches)) => handlers::handle_check_command(self, sub_matches),
            Some(("order", sub_matches)) => handlers::handle_order_command(self, sub_matches),
            Some(("eval", sub_matches)) => handlers::handle_eval_command(self, sub_matches),
            Some(("render", sub_matches)) => handlers::handle_render_command(self, sub_matches),
            Some(("replay", sub_matches)) => handlers::handle_replay_command(self, sub_matches),
            _ => {
                println!("No subcommand specified. Use --help for usage information.");
                Ok(())
            }
        }
    }

    fn build_cli(&self) -> Command {
        let set_arg = || {
            Arg::new("set")
                .short('s')
                .long("set")
                .value_name("FIELD=VALUE")
                .help("Set an input field before evaluating")
                .action(ArgAction::Append)
        };
        let format_arg = || {
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(clap::value_parser!(OutputFormat))
                .help("Output format")
        };

        Command::new(crate::NAME)
            .version(crate::VERSION)
            .about(crate::DESCRIPTION)
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .global(true)
                    .action(ArgAction::Set),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .help("Increase verbosity (can be used multiple times)")
                    .global(true)
                    .action(ArgAction::Count),
            )
            .arg(
                Arg::new("debounce")
                    .long("debounce")
                    .value_name("MS")
                    .help("Debounce window for expressions without debounceMs")
                    .global(true)
                    .value_parser(clap::value_parser!(u64)),
            )
            .arg(
                Arg::new("strict-visibility")
                    .long("strict-visibility")
                    .help("Require visibility expressions to produce booleans")
                    .global(true)
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("debug")
                    .short('d')
                    .long("debug")
                    .help("Log every evaluated field")
                    .global(true)
                    .action(ArgAction::SetTrue),
            )
            .subcommand(
                Command::new("check")
                    .about("Load schema files and report diagnostics")
                    .arg(Arg::new("input").help("Schema file or directory").required(true).index(1))
                    .arg(Arg::new("recursive").short('r').long("recursive").help("Check every schema in the directory recursively").action(ArgAction::SetTrue))
                    .arg(Arg::new("watch").short('w').long("watch").help("Reload and re-evaluate the schema when it changes").action(ArgAction::SetTrue)),
            )
            .subcommand(
                Command::new("order")
                    .about("Print the evaluation order")
                    .arg(Arg::new("input").help("Schema file").required(true).index(1))
                    .arg(Arg::new("changed").long("changed").value_name("FIELD").help("Only the fields affected by this change").action(ArgAction::Append)),
            )
            .subcommand(
                Command::new("eval")
                    .about("Evaluate every derived field")
                    .arg(Arg::new("input").help("Schema file").required(true).index(1))
                    .arg(set_arg())
                    .arg(format_arg()),
            )
            .subcommand(
                Command::new("render")
                    .about("Interpolate a template against the evaluated form")
                    .arg(Arg::new("input").help("Schema file").required(true).index(1))
                    .arg(Arg::new("template").short('t').long("template").value_name("TEMPLATE").help("Template text with {{field}} placeholders").required(true))
                    .arg(set_arg()),
            )
            .subcommand(
                Command::new("replay")
                    .about("Replay timed value changes against a simulated clock")
                    .arg(Arg::new("input").help("Schema file").required(true).index(1))
                    .arg(Arg::new("events").help("JSON array of {at, field, value} events").required(true).index(2))
                    .arg(format_arg()),
            )
    }

    fn setup_logging(&self, verbose_count: u8) {
        let log_level = match verbose_count {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        env_logger::Builder::from_default_env()
            .filter_level(log_level)
            .format_timestamp_secs()
            .init();
    }

    /// Engine options from flags, falling back to the config file.
    pub fn build_engine_options(&self, matches: &clap::ArgMatches) -> EngineOptions {
        let mut options = EngineOptions::default();
        options.debug_mode = matches.get_flag("debug") || self.config.debug_mode.unwrap_or(false);
        options.strict_visibility =
            matches.get_flag("strict-visibility") || self.config.strict_visibility.unwrap_or(false);
        if let Some(debounce) = matches
            .get_one::<u64>("debounce")
            .copied()
            .or(self.config.default_debounce_ms)
        {
            options.default_debounce_ms = debounce;
        }
        options
    }

    pub fn output_format(&self, matches: &clap::ArgMatches) -> Result<OutputFormat> {
        if let Some(format) = matches.get_one::<OutputFormat>("format") {
            return Ok(*format);
        }
        match self.config.output_format.as_deref() {
            None | Some("text") => Ok(OutputFormat::Text),
            Some("json") => Ok(OutputFormat::Json),
            Some(other) => Err(FormError::Config {
                message: format!("Unknown output_format '{}', expected text or json", other),
            }),
        }
    }
}

impl Default for FieldflowCli {
    fn default() -> Self {
        Self::new()
    }
}
