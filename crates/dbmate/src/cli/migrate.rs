use anyhow::Result;
use console::style;

use dbmate_runtime::{MigrationExecutor, MigrationReport, MigrationStatus};

pub async fn up(executor: &MigrationExecutor) -> Result<()> {
    let report = executor.up().await?;
    print_report(&report);
    Ok(())
}

pub async fn migrate(executor: &MigrationExecutor) -> Result<()> {
    let report = executor.migrate().await?;
    print_report(&report);
    Ok(())
}

pub async fn rollback(executor: &MigrationExecutor) -> Result<()> {
    let version = executor.rollback().await?;
    println!("{} Rolled back: {}", style("✓").green(), style(version).cyan());
    Ok(())
}

pub async fn status(executor: &MigrationExecutor) -> Result<()> {
    let status = executor.status().await?;
    print_status(&status);
    Ok(())
}

fn print_report(report: &MigrationReport) {
    if report.is_empty() {
        println!("{} No pending migrations", style("ℹ").blue());
        return;
    }

    for version in &report.applied {
        println!("{} Applied: {}", style("✓").green(), style(version).cyan());
    }
    println!(
        "{} {} applied, {} already up to date",
        style("ℹ").blue(),
        report.applied.len(),
        report.skipped
    );
}

fn print_status(status: &MigrationStatus) {
    if status.migrations.is_empty() && status.missing.is_empty() {
        println!("{} No migrations found", style("ℹ").blue());
        return;
    }

    for entry in &status.migrations {
        match entry.applied_at {
            Some(at) => println!(
                "  {} {} {} ({})",
                style("[X]").green(),
                style(&entry.file_name).cyan(),
                style("at").dim(),
                at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!(
                "  {} {}",
                style("[ ]").yellow(),
                style(&entry.file_name).yellow()
            ),
        }
    }

    if !status.missing.is_empty() {
        println!();
        println!("{} Applied but missing from disk:", style("!").red());
        for record in &status.missing {
            println!("  {} {}", style("→").dim(), style(&record.version).red());
        }
    }

    println!();
    println!(
        "{} {} applied, {} pending",
        style("ℹ").blue(),
        status.applied_count(),
        status.pending_count()
    );
}
