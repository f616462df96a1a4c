use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use flexi_logger::{Logger, LoggerHandle};
use log::{debug, info};
use outline::core::{Item, ItemId, ItemPatch};
use outline::datetime::DateDisplay;
use outline::projectors::row_projector::{self, ItemRow};
use outline::settings::{SettingsSnapshot, Zoom};
use outline::{DeleteMode, OutlineModel, format_due_strings, numbering_label};

#[derive(Debug, Parser)]
#[command(
    name = "outline",
    about = "Outline task list tooling built on the outline crate",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print an outline document with numbering and due labels.
    Render(RenderArgs),

    /// Insert a new item after another one, or at the end.
    Add(AddArgs),

    /// Move an item (and its subtree) one level deeper.
    Indent(TargetArgs),

    /// Move an item (and its subtree) one level up.
    Outdent(TargetArgs),

    /// Copy an item right below itself.
    Duplicate(TargetArgs),

    /// Delete an item.
    Delete(DeleteArgs),

    /// Merge a JSON patch into an item.
    Update(UpdateArgs),

    /// Format a due date/time pair.
    Due(DueArgs),

    /// Print the numbering label for a level and sibling rank.
    Number(NumberArgs),
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// Outline document (JSON array of items).
    input: PathBuf,
    /// Settings file (JSON). Defaults apply when omitted.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Hide numbering labels.
    #[arg(long)]
    no_numbering: bool,
    /// Include the weekday in due labels.
    #[arg(long)]
    day_of_week: bool,
    /// Include the year in due labels.
    #[arg(long)]
    year: bool,
    /// Badge zoom factor (1, 1.25, 1.5 or 2).
    #[arg(long)]
    zoom: Option<f64>,
    /// Emit the projected rows as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Outline document (JSON array of items).
    input: PathBuf,
    /// Id of the item to act on.
    id: ItemId,
    /// Overwrite the document instead of printing it to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct AddArgs {
    /// Outline document (JSON array of items). Created when missing.
    input: PathBuf,
    /// Insert after this item; appends a top-level item when omitted.
    #[arg(long)]
    after: Option<ItemId>,
    #[arg(long, default_value = "")]
    title: String,
    /// Overwrite the document instead of printing it to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// What happens to the item's descendants.
    #[arg(long, value_enum, default_value_t = DeleteModeArg::Reparent)]
    mode: DeleteModeArg,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DeleteModeArg {
    Cascade,
    Reparent,
}

impl From<DeleteModeArg> for DeleteMode {
    fn from(arg: DeleteModeArg) -> Self {
        match arg {
            DeleteModeArg::Cascade => DeleteMode::Cascade,
            DeleteModeArg::Reparent => DeleteMode::Reparent,
        }
    }
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// JSON object with the fields to change, e.g. '{"completed": true}'.
    #[arg(long)]
    patch: String,
}

#[derive(Debug, Args)]
struct DueArgs {
    /// Due date (YYYY-MM-DD).
    #[arg(long)]
    date: Option<String>,
    /// Due time (HH:MM).
    #[arg(long)]
    time: Option<String>,
    #[arg(long)]
    day_of_week: bool,
    #[arg(long)]
    year: bool,
}

#[derive(Debug, Args)]
struct NumberArgs {
    #[arg(long)]
    level: usize,
    /// 0-based rank among siblings.
    #[arg(long)]
    index: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging(cli.verbose)?;
    match cli.command {
        Commands::Render(args) => handle_render(args),
        Commands::Add(args) => handle_add(args),
        Commands::Indent(args) => handle_mutation(&args, |model| {
            let changed = model.indent(args.id)?;
            Ok(format!("indent {}: changed={changed}", args.id))
        }),
        Commands::Outdent(args) => handle_mutation(&args, |model| {
            let changed = model.outdent(args.id)?;
            Ok(format!("outdent {}: changed={changed}", args.id))
        }),
        Commands::Duplicate(args) => handle_mutation(&args, |model| {
            let copy = model.duplicate(args.id)?;
            Ok(format!("duplicated {} as {copy}", args.id))
        }),
        Commands::Delete(args) => handle_delete(args),
        Commands::Update(args) => handle_update(args),
        Commands::Due(args) => handle_due(args),
        Commands::Number(args) => {
            println!("{}", numbering_label(args.level, args.index, true));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) -> Result<LoggerHandle> {
    let level = if verbose { "debug" } else { "warn" };
    Logger::try_with_str(level)
        .context("configuring logger")?
        .log_to_stderr()
        .start()
        .context("starting logger")
}

fn handle_render(args: RenderArgs) -> Result<()> {
    let model = load_document(&args.input)?;
    let settings = resolve_settings(&args)?;
    debug!(
        "event=render items={} settings={:?}",
        model.len(),
        settings
    );
    let rows = row_projector::project(&model, &settings);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("serializing rows")?
        );
    } else {
        for row in &rows {
            println!("{}", render_row(row));
        }
    }
    Ok(())
}

fn resolve_settings(args: &RenderArgs) -> Result<SettingsSnapshot> {
    let mut settings = match &args.settings {
        Some(path) => {
            let text =
                fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {:?}", path))?
        }
        None => SettingsSnapshot::default(),
    };
    if args.no_numbering {
        settings.show_numbering = false;
    }
    if args.day_of_week {
        settings.show_day_of_week = true;
    }
    if args.year {
        settings.show_year = true;
    }
    if let Some(factor) = args.zoom {
        settings.zoom = Zoom::from_factor(factor)
            .with_context(|| format!("unsupported zoom factor {factor}"))?;
    }
    Ok(settings)
}

fn render_row(row: &ItemRow) -> String {
    let mut line = format!(
        "{}{}[{}] {}",
        "  ".repeat(row.level),
        row.numbering,
        if row.completed { "x" } else { " " },
        row.title
    );
    if let Some(priority) = row.priority.as_str() {
        line.push_str(&format!(" !{priority}"));
    }
    if let Some(due) = &row.due_label {
        line.push_str(&format!(" ({due})"));
    }
    line
}

fn handle_add(args: AddArgs) -> Result<()> {
    let AddArgs {
        input,
        after,
        title,
        in_place,
    } = args;
    let mut model = if input.exists() {
        load_document(&input)?
    } else {
        OutlineModel::new()
    };
    let id = match after {
        Some(anchor) => model
            .insert_after_with(anchor, title)
            .with_context(|| format!("updating {:?}", input))?,
        None => model.append(Item::new(title, 0)),
    };
    write_document(&input, &model, in_place, &format!("added {id}"))
}

fn handle_delete(args: DeleteArgs) -> Result<()> {
    let mode = DeleteMode::from(args.mode);
    let id = args.target.id;
    handle_mutation(&args.target, |model| {
        let removed = model.delete_with(id, mode)?;
        Ok(format!("deleted {} item(s) starting at {id}", removed.len()))
    })
}

fn handle_update(args: UpdateArgs) -> Result<()> {
    let patch: ItemPatch = serde_json::from_str(&args.patch).context("parsing --patch")?;
    if patch.is_noop() {
        anyhow::bail!("--patch does not name any field");
    }
    let id = args.target.id;
    handle_mutation(&args.target, |model| {
        let changed = model.update(id, patch)?;
        Ok(format!("update {id}: changed={changed}"))
    })
}

fn handle_due(args: DueArgs) -> Result<()> {
    let display = DateDisplay {
        show_day_of_week: args.day_of_week,
        show_year: args.year,
    };
    let label = format_due_strings(args.date.as_deref(), args.time.as_deref(), display)?;
    match label {
        Some(label) => println!("{label}"),
        None => println!(),
    }
    Ok(())
}

fn handle_mutation<F>(target: &TargetArgs, mutate: F) -> Result<()>
where
    F: FnOnce(&mut OutlineModel) -> outline::core::Result<String>,
{
    let mut model = load_document(&target.input)?;
    let summary = mutate(&mut model).with_context(|| format!("updating {:?}", target.input))?;
    write_document(&target.input, &model, target.in_place, &summary)
}

fn load_document(path: &Path) -> Result<OutlineModel> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let items: Vec<Item> =
        serde_json::from_str(&text).with_context(|| format!("parsing {:?}", path))?;
    debug!("event=load path={:?} items={}", path, items.len());
    Ok(OutlineModel::from_items(items))
}

fn document_text(model: &OutlineModel) -> Result<String> {
    let mut text =
        serde_json::to_string_pretty(&model.to_items()).context("serializing outline")?;
    text.push('\n');
    Ok(text)
}

fn write_document(path: &Path, model: &OutlineModel, in_place: bool, summary: &str) -> Result<()> {
    let text = document_text(model)?;
    if in_place {
        fs::write(path, text.as_bytes()).with_context(|| format!("writing {:?}", path))?;
        info!("event=write path={:?} summary={summary:?}", path);
        eprintln!("{summary}; wrote {}", path.display());
    } else {
        info!("event=mutate summary={summary:?}");
        print!("{text}");
    }
    Ok(())
}
