//! Versioned Graph workspace tool
//!
//! Inspects and maintains the project spaces of a local workspace.

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use versioned_graph::core::Config;
use versioned_graph::storage::Serializer;
use versioned_graph::{FileSerializer, ProjectId, Workspace};
use tracing::info;

fn main() -> anyhow::Result<()> {
    let matches = Command::new("versioned-graph")
        .version(versioned_graph::VERSION)
        .about("Change tracking and versioning for hierarchical object graphs.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("workspace")
                .short('w')
                .long("workspace")
                .value_name("DIR")
                .help("Workspace root directory"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .help("Print collected metrics before exiting"),
        )
        .subcommand(Command::new("list").about("List project spaces"))
        .subcommand(
            Command::new("show")
                .about("Show a project space")
                .arg(Arg::new("project").required(true).value_name("PROJECT_ID")),
        )
        .subcommand(Command::new("create").about("Create an empty project space"))
        .subcommand(
            Command::new("delete")
                .about("Delete a project space and its files")
                .arg(Arg::new("project").required(true).value_name("PROJECT_ID")),
        )
        .subcommand(
            Command::new("save")
                .about("Rewrite every unit of a project space")
                .arg(Arg::new("project").required(true).value_name("PROJECT_ID")),
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path))?,
        None => Config::load()?,
    };
    apply_cli_overrides(&mut config, &matches);
    config.validate()?;

    versioned_graph::init_logging(&config.logging)?;
    info!("Using workspace {}", config.workspace.root.display());

    let serializer = FileSerializer::from_config(&config.persistence);
    let workspace = Workspace::open(config, serializer)?;

    match matches.subcommand() {
        Some(("show", sub)) => show(&workspace, project_arg(sub)?)?,
        Some(("create", _)) => {
            let space = workspace.create_project_space()?;
            println!("{}", space.project_id());
        }
        Some(("delete", sub)) => workspace.delete_project_space(project_arg(sub)?)?,
        Some(("save", sub)) => {
            let id = project_arg(sub)?;
            let space = workspace
                .project_space(id)
                .with_context(|| format!("no project space {}", id))?;
            let report = space.save_all()?;
            println!("saved {} units, {} bytes", report.saved.len(), report.bytes);
        }
        _ => list(&workspace),
    }

    if matches.get_flag("metrics") {
        print!("{}", versioned_graph::system::metrics::collect_metrics());
    }
    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &ArgMatches) {
    if let Some(root) = matches.get_one::<String>("workspace") {
        config.workspace.root = root.into();
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
}

fn project_arg(matches: &ArgMatches) -> anyhow::Result<ProjectId> {
    let raw = matches
        .get_one::<String>("project")
        .context("missing project id")?;
    ProjectId::parse(raw).with_context(|| format!("invalid project id {}", raw))
}

fn list(workspace: &Workspace<FileSerializer>) {
    let mut spaces = workspace.project_spaces();
    spaces.sort_by_key(|s| s.project_id().to_string());
    for space in spaces {
        let name = space.info().map(|i| i.name).unwrap_or_else(|| "(local)".to_string());
        println!(
            "{}  {:<20} {}  {} pending",
            space.project_id(),
            name,
            space.base_version(),
            space.operation_count()
        );
    }
}

fn show(workspace: &Workspace<FileSerializer>, id: ProjectId) -> anyhow::Result<()> {
    let space = workspace
        .project_space(id)
        .with_context(|| format!("no project space {}", id))?;
    let serializer = space.serializer();

    println!("project   {}", id);
    if let Some(info) = space.info() {
        println!("name      {}", info.name);
        println!("server    {}", info.version);
    }
    println!("base      {}", space.base_version());
    println!("status    {:?}", space.status());
    println!("pending   {}", space.operation_count());
    space.read(|project| {
        println!("nodes     {}", project.len());
        for unit in project.units() {
            let size = serializer
                .stored_size(unit)
                .map(|s| format!("{} bytes", s))
                .unwrap_or_else(|| "not stored".to_string());
            println!("unit      {}  {} roots  {}", unit.uri(), unit.contents().len(), size);
        }
    });
    Ok(())
}
