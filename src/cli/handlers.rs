use super::{FieldflowCli, OutputFormat};
use crate::{
    load_form, schedule, ComputedValueSink, EngineOptions, EvaluationResult, FnSink, Form, FormError,
    Millis, NullSink, PassReport, Propagator, PropagatorState, Result, Value, ValueChange,
};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::mpsc::channel;
use std::time::Instant;

// --- CHECK ---
pub fn handle_check_command(cli: &FieldflowCli, matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "input")?;
    let options = cli.build_engine_options(matches);

    if matches.get_flag("watch") {
        watch_and_reload(Path::new(input_path), options)
    } else if matches.get_flag("recursive") && Path::new(input_path).is_dir() {
        check_directory_recursive(input_path, &options)
    } else {
        check_single_file(Path::new(input_path), &options)
    }
}

fn check_single_file(path: &Path, options: &EngineOptions) -> Result<()> {
    println!("🔍 Checking {}", path.display());
    let form = match load_form(path, options.clone()) {
        Ok(form) => form,
        Err(e) => {
            println!("❌ {} - {}", path.display(), e);
            return Err(e);
        }
    };

    print_diagnostics(&form);
    let errors = form.diagnostics().iter().filter(|d| d.is_error()).count();
    if errors == 0 {
        println!(
            "✅ {} - {} fields, {} edges, no errors",
            path.display(),
            form.fields().len(),
            form.graph().edge_count()
        );
        Ok(())
    } else {
        println!("❌ {} - {} error(s)", path.display(), errors);
        Err(FormError::InvalidFormat {
            message: format!("{} has {} schema error(s)", path.display(), errors),
        })
    }
}

fn check_directory_recursive(dir_path: &str, options: &EngineOptions) -> Result<()> {
    let mut total_files = 0;
    let mut error_files = 0;

    for entry in walkdir::WalkDir::new(dir_path) {
        let entry = entry.map_err(|e| {
            FormError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Directory traversal error: {}", e),
            ))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_schema = entry
            .path()
            .extension()
            .map_or(false, |ext| ext == "json" || ext == "toml");
        if is_schema {
            total_files += 1;
            if check_single_file(entry.path(), options).is_err() {
                error_files += 1;
            }
        }
    }

    println!("\n📊 Check Summary:");
    println!("   Total schemas: {}", total_files);
    println!("   Schemas with errors: {}", error_files);
    if total_files > 0 {
        println!(
            "   Success rate: {:.1}%",
            (total_files - error_files) as f64 / total_files as f64 * 100.0
        );
    }

    if error_files > 0 {
        Err(FormError::InvalidFormat {
            message: format!("{} schema(s) have errors", error_files),
        })
    } else {
        Ok(())
    }
}

fn watch_and_reload(path: &Path, options: EngineOptions) -> Result<()> {
    println!("👀 Watching {} for changes...", path.display());

    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if let Err(e) = tx.send(event) {
                    eprintln!("Watch error: {}", e);
                }
            }
        },
        notify::Config::default(),
    )
    .map_err(|e| {
        FormError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to create file watcher: {}", e),
        ))
    })?;

    watcher.watch(path, RecursiveMode::NonRecursive).map_err(|e| {
        FormError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to watch file: {}", e),
        ))
    })?;

    let started = Instant::now();
    let elapsed = || started.elapsed().as_millis() as Millis;

    let form = load_form(path, options.clone())?;
    print_diagnostics(&form);
    let mut propagator = Propagator::new(Rc::new(form));
    let report = propagator.evaluate_all(elapsed(), &mut NullSink);
    print_report(&report);

    loop {
        match rx.recv() {
            Ok(_event) => {
                println!("🔄 Schema changed, reloading...");
                match load_form(path, options.clone()) {
                    Ok(form) => {
                        print_diagnostics(&form);
                        let report = propagator.reload(Rc::new(form), elapsed(), &mut NullSink);
                        print_report(&report);
                    }
                    Err(e) => eprintln!("❌ Reload failed: {}", e),
                }
            }
            Err(e) => {
                eprintln!("Watch error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

// --- ORDER ---
pub fn handle_order_command(cli: &FieldflowCli, matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "input")?;
    let form = load_form(input_path, cli.build_engine_options(matches))?;
    let graph = form.graph();

    let subset: BTreeSet<usize> = match matches.get_many::<String>("changed") {
        Some(changed) => {
            let changed: Vec<&String> = changed.collect();
            if let Some(unknown) = changed.iter().find(|id| !form.contains(id)) {
                return Err(FormError::Config {
                    message: format!("Unknown field '{}'", unknown),
                });
            }
            graph.affected_by(changed.into_iter().map(String::as_str))
        }
        None => (0..graph.len()).collect(),
    };

    let plan = schedule(graph, &subset);
    println!("📋 Evaluation order ({} fields):", plan.steps.len());
    for (position, step) in plan.steps.iter().enumerate() {
        let kind = if form.is_derived(&step.field_id) { "derived" } else { "input" };
        match step.cycle {
            Some(cycle) => println!(
                "   {:>3}. {} ({}, cycle: {})",
                position + 1,
                step.field_id,
                kind,
                plan.cycles[cycle].join(", ")
            ),
            None => println!("   {:>3}. {} ({})", position + 1, step.field_id, kind),
        }
    }
    Ok(())
}

// --- EVAL ---
pub fn handle_eval_command(cli: &FieldflowCli, matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "input")?;
    let format = cli.output_format(matches)?;
    let changes = parse_assignments(matches.get_many::<String>("set").into_iter().flatten())?;

    let form = load_form(input_path, cli.build_engine_options(matches))?;
    let propagator = evaluate_with_changes(Rc::new(form), changes)?;
    let form = propagator.form();

    match format {
        OutputFormat::Text => {
            print_diagnostics(form);
            for field in form.fields() {
                let value = propagator.value(&field.id).cloned().unwrap_or_default();
                let marker = if field.is_derived() { "=" } else { ":" };
                println!("   {} {} {}", field.id, marker, value);
            }
        }
        OutputFormat::Json => {
            let values: serde_json::Map<String, serde_json::Value> = form
                .fields()
                .iter()
                .map(|field| {
                    let value = propagator.value(&field.id).cloned().unwrap_or_default();
                    (field.id.clone(), json_value(&value))
                })
                .collect();
            let output = serde_json::json!({
                "values": values,
                "diagnostics": form.diagnostics(),
            });
            println!("{}", to_pretty_json(&output)?);
        }
    }
    Ok(())
}

// --- RENDER ---
pub fn handle_render_command(cli: &FieldflowCli, matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "input")?;
    let template = required(matches, "template")?;
    let changes = parse_assignments(matches.get_many::<String>("set").into_iter().flatten())?;

    let form = load_form(input_path, cli.build_engine_options(matches))?;
    let propagator = evaluate_with_changes(Rc::new(form), changes)?;
    println!("{}", propagator.render(template));
    Ok(())
}

// --- REPLAY ---
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayEvent {
    pub at: Millis,
    pub field: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

pub fn handle_replay_command(cli: &FieldflowCli, matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "input")?;
    let events_path = required(matches, "events")?;
    let format = cli.output_format(matches)?;

    let content = fs::read_to_string(events_path).map_err(|e| FormError::FileNotFound {
        path: format!("{}: {}", events_path, e),
    })?;
    let events: Vec<ReplayEvent> = serde_json::from_str(&content).map_err(|e| FormError::InvalidFormat {
        message: format!("Invalid events file: {}", e),
    })?;

    let form = load_form(input_path, cli.build_engine_options(matches))?;
    let mut propagator = Propagator::new(Rc::new(form));
    propagator.evaluate_all(0, &mut NullSink);

    let reports = match format {
        OutputFormat::Text => {
            println!("▶️  Replaying {} event(s)", events.len());
            let mut sink = FnSink(|result: &EvaluationResult| {
                let status = match &result.error {
                    Some(err) => format!("  ⚠️  {}", err),
                    None => String::new(),
                };
                println!("   {:>6}ms  {} = {}{}", result.timestamp, result.field_id, result.value, status);
            });
            replay(&mut propagator, events, &mut sink)
        }
        OutputFormat::Json => replay(&mut propagator, events, &mut NullSink),
    };

    match format {
        OutputFormat::Text => {
            let stats = propagator.stats();
            println!("\n📊 Replay Summary:");
            println!("   Passes: {}", reports.len());
            println!("   Changes ignored: {}", stats.changes_ignored);
            println!("   Evaluation errors: {}", stats.evaluation_errors);
        }
        OutputFormat::Json => println!("{}", to_pretty_json(&reports)?),
    }
    Ok(())
}

/// Feed timed events to the propagator, firing each debounce timer when the simulated
/// clock reaches it. Timers due at the same instant as an event fire first.
pub fn replay(
    propagator: &mut Propagator,
    mut events: Vec<ReplayEvent>,
    sink: &mut dyn ComputedValueSink,
) -> Vec<PassReport> {
    events.sort_by_key(|event| event.at);
    let mut reports = Vec::new();

    for event in events {
        advance_to(propagator, event.at, sink, &mut reports);
        let mut change = ValueChange::new(event.field, event.value);
        change.valid = event.valid;
        propagator.on_change(change, event.at);
    }
    advance_to(propagator, Millis::MAX, sink, &mut reports);

    reports
}

fn advance_to(
    propagator: &mut Propagator,
    now: Millis,
    sink: &mut dyn ComputedValueSink,
    reports: &mut Vec<PassReport>,
) {
    while let Some(deadline) = propagator.deadline() {
        if deadline > now {
            break;
        }
        match propagator.poll(deadline, sink) {
            Some(report) => reports.push(report),
            None => break,
        }
    }
}

fn evaluate_with_changes(form: Rc<Form>, changes: Vec<ValueChange>) -> Result<Propagator> {
    for change in &changes {
        if !form.contains(&change.field_id) {
            return Err(FormError::Config {
                message: format!("Unknown field '{}'", change.field_id),
            });
        }
    }

    let mut propagator = Propagator::new(form);
    propagator.evaluate_all(0, &mut NullSink);
    for change in changes {
        propagator.on_change(change, 0);
    }
    if propagator.state() == PropagatorState::Pending {
        propagator.fire_timer(&mut NullSink);
    }
    Ok(propagator)
}

/// Parse `FIELD=VALUE` arguments into value changes.
pub fn parse_assignments<'a, I>(assignments: I) -> Result<Vec<ValueChange>>
where
    I: IntoIterator<Item = &'a String>,
{
    assignments
        .into_iter()
        .map(|assignment| match assignment.split_once('=') {
            Some((field, raw)) if !field.trim().is_empty() => {
                Ok(ValueChange::new(field.trim(), Value::parse_raw(raw)))
            }
            _ => Err(FormError::InvalidFormat {
                message: format!("Invalid assignment: {}. Use FIELD=VALUE format.", assignment),
            }),
        })
        .collect()
}

fn print_diagnostics(form: &Form) {
    for diagnostic in form.diagnostics() {
        let icon = if diagnostic.is_error() { "❌" } else { "⚠️ " };
        println!("   {} {}", icon, diagnostic);
    }
}

fn print_report(report: &PassReport) {
    for result in &report.results {
        match &result.error {
            Some(err) => println!("   {} = {}  ⚠️  {}", result.field_id, result.value, err),
            None => println!("   {} = {}", result.field_id, result.value),
        }
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Number(n) if n.is_finite() => serde_json::Value::from(*n),
        Value::Number(_) => serde_json::Value::String(value.to_string()),
        Value::String(s) => serde_json::Value::String(s.clone()),
    }
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| FormError::InvalidFormat {
        message: format!("JSON serialization error: {}", e),
    })
}

fn required<'a>(matches: &'a clap::ArgMatches, name: &str) -> Result<&'a String> {
    matches.get_one::<String>(name).ok_or_else(|| FormError::Config {
        message: format!("Missing argument '{}'", name),
    })
}
