use anyhow::Result;
use console::style;

use dbmate_runtime::MigrationExecutor;

pub async fn create(executor: &MigrationExecutor) -> Result<()> {
    executor.create_database().await?;
    println!("{} Database is present", style("✓").green());
    Ok(())
}

pub async fn drop(executor: &MigrationExecutor) -> Result<()> {
    executor.drop_database().await?;
    println!("{} Database dropped", style("✓").green());
    Ok(())
}
