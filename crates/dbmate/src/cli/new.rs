use anyhow::Result;
use clap::Parser;
use console::style;

use dbmate_core::config::DbmateConfig;
use dbmate_runtime::migrations::store;

/// Generate a new migration file.
#[derive(Parser)]
pub struct NewCommand {
    /// Migration name, e.g. `create users`.
    #[arg(required = true, num_args = 1..)]
    pub name: Vec<String>,
}

impl NewCommand {
    /// Execute the new migration command.
    pub fn execute(self, config: &DbmateConfig) -> Result<()> {
        let name = self.name.join(" ");
        let path = store::create_new(&config.migrations_dir, &name)?;

        println!(
            "{} Created migration {}",
            style("✓").green(),
            style(path.display()).cyan()
        );
        Ok(())
    }
}
