//! Config subcommand handlers.

use nasshape_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

pub fn handle(args: ConfigArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let out = match args.command {
        ConfigCommand::Show => config.to_toml()?,
        ConfigCommand::Path => util::config_file(global).display().to_string(),
    };
    output::print_output(out.trim_end(), global.quiet);
    Ok(())
}
