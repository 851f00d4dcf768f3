use clap::Parser;
use colored::*;
use serde::de::DeserializeOwned;
use std::io::Read;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fas::{
    cli::{ApplicantCommand, ApplicationCommand, Cli, Commands, OutputFormat, SchemeCommand},
    config::LoggingConfig,
    import::{BatchImporter, SeedDocument},
    intake::{ApplicantIntake, ApplicationDesk},
    pool::Pool,
    schemes::{EligibilityChecker, Reclamation, SchemeChange, SchemeManager},
    storage::{
        Applicant, ApplicantDraft, Application, ApplicationPatch, ApplicationRequest,
        Database, Scheme, SchemeDraft,
    },
    utils, Config, Result,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::load(&cli.config);

    let filter = match &config {
        Ok(cfg) => cfg.logging.filter.clone(),
        Err(_) => LoggingConfig::default().filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Init { force } => initialize(&config, &cli.config, force).await,
        Commands::Applicant { action } => applicant_command(&config, action).await,
        Commands::Scheme { action } => scheme_command(&config, action).await,
        Commands::Application { action } => application_command(&config, action).await,
        Commands::Pool { format } => show_pool(&config, format).await,
        Commands::Sweep { watch, interval } => {
            let interval = interval.unwrap_or(config.sweep.interval_secs);
            if watch {
                info!("Starting sweep service (interval: {}s)", interval);
                run_sweep_service(&config, interval).await
            } else {
                sweep_once(&config).await
            }
        }
        Commands::Stats { format } => show_stats(&config, format).await,
        Commands::Import { file, no_progress } => import_seed(&config, &file, !no_progress).await,
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }
}

fn open_db(config: &Config) -> Result<Database> {
    Database::from_config(&config.database)
}

/// Read a JSON document from `file`, or stdin when absent or "-".
fn read_json<T: DeserializeOwned>(file: Option<&str>) -> Result<T> {
    let text = match file {
        Some(path) if path != "-" => std::fs::read_to_string(path)?,
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&text)?)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn initialize(config: &Config, config_path: &str, force: bool) -> Result<()> {
    println!("{}", "Initializing financial assistance scheme engine...".green());

    if std::path::Path::new(config_path).exists() && !force {
        println!("{}", format!("✓ Keeping existing {}", config_path).yellow());
    } else {
        std::fs::write(config_path, config.to_toml()?)?;
        println!("{}", format!("✓ Wrote {}", config_path).green());
    }

    let _db = open_db(config)?;
    println!("{}", "✓ Database initialized".green());

    println!("\n{}", "Configuration:".cyan());
    println!("  Database:       {}", config.database.path);
    println!("  Busy Timeout:   {} ms", config.database.busy_timeout_ms);
    println!("  Import Workers: {}", config.import.workers);
    println!("  Batch Size:     {}", config.import.batch_size);
    println!("  Sweep Interval: {} s", config.sweep.interval_secs);

    println!("\n{}", "Ready to use! Try running:".cyan());
    println!("  {} to load seed data", "fas import seed.json".yellow());
    println!("  {} to browse schemes", "fas scheme list".yellow());
    Ok(())
}

async fn applicant_command(config: &Config, action: ApplicantCommand) -> Result<()> {
    let mut db = open_db(config)?;
    let mut intake = ApplicantIntake::new(&mut db);

    match action {
        ApplicantCommand::Create { file } => {
            let draft: ApplicantDraft = read_json(file.as_deref())?;
            print_json(&intake.create_applicant(&draft)?)
        }
        ApplicantCommand::List { format } => {
            let applicants = intake.list_applicants()?;
            match format {
                OutputFormat::Json => print_json(&applicants),
                OutputFormat::Table => {
                    print_applicants(&applicants);
                    Ok(())
                }
            }
        }
        ApplicantCommand::Get { id, format } => {
            let applicant = intake.get_applicant(&id)?;
            match format {
                OutputFormat::Json => print_json(&applicant),
                OutputFormat::Table => {
                    print_applicants(std::slice::from_ref(&applicant));
                    Ok(())
                }
            }
        }
        ApplicantCommand::Update { id, file } => {
            let draft: ApplicantDraft = read_json(file.as_deref())?;
            print_json(&intake.update_applicant(&id, &draft)?)
        }
        ApplicantCommand::Delete { id, yes } => {
            if !yes && !utils::confirm_action(&format!("Delete applicant {} and their applications?", id)) {
                println!("Cancelled");
                return Ok(());
            }
            intake.delete_applicant(&id)?;
            println!("{}", format!("✓ Deleted applicant {}", id).green());
            Ok(())
        }
    }
}

async fn scheme_command(config: &Config, action: SchemeCommand) -> Result<()> {
    let mut db = open_db(config)?;

    match action {
        SchemeCommand::Create { file } => {
            let draft: SchemeDraft = read_json(file.as_deref())?;
            print_json(&SchemeManager::new(&mut db).create_scheme(&draft)?)
        }
        SchemeCommand::List { format } => {
            let schemes = SchemeManager::new(&mut db).list_schemes()?;
            match format {
                OutputFormat::Json => print_json(&schemes),
                OutputFormat::Table => {
                    print_schemes(&schemes);
                    Ok(())
                }
            }
        }
        SchemeCommand::Get { id, format } => {
            let scheme = SchemeManager::new(&mut db).get_scheme(&id)?;
            match format {
                OutputFormat::Json => print_json(&scheme),
                OutputFormat::Table => {
                    print_schemes(std::slice::from_ref(&scheme));
                    Ok(())
                }
            }
        }
        SchemeCommand::Update { id, file } => {
            let draft: SchemeDraft = read_json(file.as_deref())?;
            let change = SchemeManager::new(&mut db).update_scheme(&id, &draft)?;
            report_change("Updated", &change);
            Ok(())
        }
        SchemeCommand::Delete { id, yes } => {
            if !yes && !utils::confirm_action(&format!("Delete scheme {} and its applications?", id)) {
                println!("Cancelled");
                return Ok(());
            }
            let change = SchemeManager::new(&mut db).delete_scheme(&id)?;
            report_change("Deleted", &change);
            Ok(())
        }
        SchemeCommand::Eligible { applicant_id, format } => {
            let schemes = EligibilityChecker::new(&db).eligible_schemes_for(&applicant_id)?;
            match format {
                OutputFormat::Json => print_json(&schemes),
                OutputFormat::Table => {
                    if schemes.is_empty() {
                        println!("{}", "No eligible schemes".yellow());
                    } else {
                        print_schemes(&schemes);
                    }
                    Ok(())
                }
            }
        }
        SchemeCommand::Explain { applicant_id, format } => {
            let reports = EligibilityChecker::new(&db).explain_for(&applicant_id)?;
            match format {
                OutputFormat::Json => print_json(&reports),
                OutputFormat::Table => {
                    for report in &reports {
                        let verdict = if report.eligible {
                            "eligible".green()
                        } else {
                            "not eligible".red()
                        };
                        println!("{} ({}): {}", report.scheme_name.bold(), utils::format_id(&report.scheme_id), verdict);
                        for reason in &report.unmet {
                            println!("  ✗ {}", reason);
                        }
                    }
                    Ok(())
                }
            }
        }
    }
}

fn report_change(verb: &str, change: &SchemeChange) {
    println!("{}", format!("✓ {} scheme {}", verb, change.scheme_id).green());
    match &change.reclamation {
        Reclamation::Completed(summary) if summary.total() > 0 => println!(
            "  Reclaimed {} criteria and {} benefits",
            summary.criteria_removed, summary.benefits_removed
        ),
        Reclamation::Completed(_) => {}
        Reclamation::Skipped { reason } => println!(
            "{}",
            format!("  Reclaim skipped ({}); run `fas sweep` later", reason).yellow()
        ),
    }
}

async fn application_command(config: &Config, action: ApplicationCommand) -> Result<()> {
    let mut db = open_db(config)?;
    let mut desk = ApplicationDesk::new(&mut db);

    match action {
        ApplicationCommand::Create { file } => {
            let request: ApplicationRequest = read_json(file.as_deref())?;
            print_json(&desk.submit(&request)?)
        }
        ApplicationCommand::List { format } => {
            let applications = desk.list_applications()?;
            match format {
                OutputFormat::Json => print_json(&applications),
                OutputFormat::Table => {
                    print_applications(&applications);
                    Ok(())
                }
            }
        }
        ApplicationCommand::Get { id } => print_json(&desk.get_application(&id)?),
        ApplicationCommand::Update { id, status, applied_date } => {
            let patch = ApplicationPatch { status, applied_date };
            print_json(&desk.update_application(&id, &patch)?)
        }
        ApplicationCommand::Delete { id, yes } => {
            if !yes && !utils::confirm_action(&format!("Delete application {}?", id)) {
                println!("Cancelled");
                return Ok(());
            }
            desk.delete_application(&id)?;
            println!("{}", format!("✓ Deleted application {}", id).green());
            Ok(())
        }
    }
}

async fn show_pool(config: &Config, format: OutputFormat) -> Result<()> {
    let db = open_db(config)?;
    let usage = Pool::usage(&db)?;

    if format == OutputFormat::Json {
        return print_json(&usage);
    }

    println!("{}", "=== Criteria & Benefit Pool ===".cyan().bold());
    utils::print_table_border(72);
    utils::print_table_row(&["Kind", "Definition", "Schemes"], &[10, 50, 8]);
    utils::print_table_border(72);
    for entry in &usage.criteria {
        utils::print_table_row(
            &["criterion", &entry.item.spec().to_string(), &entry.references.to_string()],
            &[10, 50, 8],
        );
    }
    for entry in &usage.benefits {
        utils::print_table_row(
            &[
                "benefit",
                &format!("{} (${})", entry.item.name, entry.item.amount),
                &entry.references.to_string(),
            ],
            &[10, 50, 8],
        );
    }
    utils::print_table_border(72);

    let orphans = usage.orphans();
    if orphans > 0 {
        println!("{}", format!("{} unreferenced entries; run `fas sweep`", orphans).yellow());
    }
    Ok(())
}

async fn sweep_once(config: &Config) -> Result<()> {
    let mut db = open_db(config)?;
    let summary = Pool::sweep(&mut db)?;
    println!(
        "Removed {} criteria and {} benefits",
        summary.criteria_removed, summary.benefits_removed
    );
    Ok(())
}

async fn run_sweep_service(config: &Config, interval: u64) -> Result<()> {
    println!("{}", "Starting pool sweep service...".green());
    println!("Interval: {} seconds", interval);

    let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Sweep service stopping");
                return Ok(());
            }
        }

        info!("Running sweep cycle...");
        let cycle = open_db(config).and_then(|mut db| Pool::sweep(&mut db));
        match cycle {
            Ok(summary) if summary.total() == 0 => info!("Pool is clean"),
            Ok(_) => {}
            Err(e) => warn!("Sweep failed: {}", e),
        }
    }
}

async fn show_stats(config: &Config, format: OutputFormat) -> Result<()> {
    let db = open_db(config)?;
    let stats = db.get_stats()?;

    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    println!("{}", "=== Scheme Engine Statistics ===".cyan().bold());
    println!("\nApplicants:");
    println!("  Total:        {}", stats.applicants);
    println!("  Household:    {}", stats.household_members);

    println!("\nSchemes:");
    println!("  Total:        {}", stats.schemes);
    println!("  Open to all:  {}", stats.open_schemes.to_string().green());
    println!("  Benefits:     {}", utils::format_amount(stats.total_benefit_amount));

    println!("\nPool:");
    println!("  Criteria:     {}", stats.criteria);
    println!("  Benefits:     {}", stats.benefits);

    println!("\nApplications:");
    println!("  Total:        {}", stats.applications);
    println!("  Pending:      {}", stats.pending_applications.to_string().yellow());
    Ok(())
}

async fn import_seed(config: &Config, file: &str, show_progress: bool) -> Result<()> {
    let seed: SeedDocument = read_json(Some(file))?;
    info!("Importing {} items from {}", seed.len(), file);

    let summary = BatchImporter::new(&config.database, &config.import)
        .with_progress(show_progress)
        .import(seed)
        .await?;
    summary.print_summary();
    Ok(())
}

fn print_applicants(applicants: &[Applicant]) {
    let widths = [10, 24, 14, 10, 12, 9];
    utils::print_table_border(89);
    utils::print_table_row(&["ID", "Name", "Employment", "Marital", "Born", "Household"], &widths);
    utils::print_table_border(89);
    for a in applicants {
        utils::print_table_row(
            &[
                &utils::format_id(&a.id),
                &a.name,
                a.employment_status.as_str(),
                a.marital_status.as_str(),
                &a.date_of_birth.to_string(),
                &a.household.len().to_string(),
            ],
            &widths,
        );
    }
    utils::print_table_border(89);
}

fn print_schemes(schemes: &[Scheme]) {
    let widths = [10, 26, 40, 30];
    utils::print_table_border(112);
    utils::print_table_row(&["ID", "Name", "Criteria", "Benefits"], &widths);
    utils::print_table_border(112);
    for s in schemes {
        let criteria = if s.is_open() {
            "(open to all)".to_string()
        } else {
            s.criteria
                .iter()
                .map(|c| c.spec().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let benefits = s
            .benefits
            .iter()
            .map(|b| format!("{} ${}", b.name, b.amount))
            .collect::<Vec<_>>()
            .join(", ");
        utils::print_table_row(&[&utils::format_id(&s.id), &s.name, &criteria, &benefits], &widths);
    }
    utils::print_table_border(112);
}

fn print_applications(applications: &[Application]) {
    let widths = [10, 10, 10, 10, 12];
    utils::print_table_border(60);
    utils::print_table_row(&["ID", "Applicant", "Scheme", "Status", "Applied"], &widths);
    utils::print_table_border(60);
    for app in applications {
        utils::print_table_row(
            &[
                &utils::format_id(&app.id),
                &utils::format_id(&app.applicant_id),
                &utils::format_id(&app.scheme_id),
                app.status.as_str(),
                &app.applied_date.to_string(),
            ],
            &widths,
        );
    }
    utils::print_table_border(60);
}
