//! File logging for database handlers.
//!
//! Handlers emit `tracing` events inside a `dbh{log_id, connection}` span.
//! The first call to [`init_file_logging`] installs a process-wide
//! subscriber whose layer routes each event to the file registered for the
//! nearest `log_id` on its span stack. Every later call only adds or
//! re-points a route, so handlers with different log settings each get
//! their own file. Events outside any routed span are not written.

use crate::config::{LogLevel, LogSettings};
use crate::core::{DbhError, Result};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{info, info_span, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

/// Span field that selects the log file.
const LOG_ID_FIELD: &str = "log_id";

static ROUTES: OnceCell<Arc<LogRoutes>> = OnceCell::new();

struct Route {
    path: PathBuf,
    level: LogLevel,
}

#[derive(Default)]
struct RouteTable {
    by_id: HashMap<String, Route>,
    files: HashMap<PathBuf, Arc<Mutex<File>>>,
}

/// Log id to file mapping shared by the installed layer.
#[derive(Default)]
struct LogRoutes {
    table: Mutex<RouteTable>,
}

impl LogRoutes {
    fn lock(&self) -> MutexGuard<'_, RouteTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add(&self, settings: &LogSettings, path: &Path) -> Result<()> {
        let mut table = self.lock();
        if !table.files.contains_key(path) {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            table
                .files
                .insert(path.to_path_buf(), Arc::new(Mutex::new(file)));
        }
        table.by_id.insert(
            settings.id.clone(),
            Route {
                path: path.to_path_buf(),
                level: settings.level,
            },
        );
        Ok(())
    }

    /// Writer and threshold for `log_id`, if it has a route.
    fn target(&self, log_id: &str) -> Option<(Arc<Mutex<File>>, LogLevel)> {
        let table = self.lock();
        let route = table.by_id.get(log_id)?;
        let file = table.files.get(&route.path)?;
        Some((file.clone(), route.level))
    }

    fn path(&self, log_id: &str) -> Option<PathBuf> {
        self.lock().by_id.get(log_id).map(|route| route.path.clone())
    }
}

/// Span data kept in the registry's extensions.
struct SpanFields {
    log_id: Option<String>,
    rendered: String,
}

/// Collects `key=value` pairs, pulling out the message and the log id.
#[derive(Default)]
struct FieldCollector {
    message: String,
    log_id: Option<String>,
    rendered: String,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_debug(field, &format_args!("{}", value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            name => {
                if name == LOG_ID_FIELD {
                    self.log_id = Some(format!("{:?}", value));
                }
                if !self.rendered.is_empty() {
                    self.rendered.push(' ');
                }
                let _ = write!(self.rendered, "{}={:?}", name, value);
            }
        }
    }
}

/// Layer writing each event to the file of its innermost `log_id`.
struct FileRouter {
    routes: Arc<LogRoutes>,
}

impl<S> Layer<S> for FileRouter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut fields = FieldCollector::default();
        attrs.record(&mut fields);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields {
                log_id: fields.log_id,
                rendered: fields.rendered,
            });
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let mut fields = FieldCollector::default();
        values.record(&mut fields);
        if let Some(span) = ctx.span(id) {
            if let Some(existing) = span.extensions_mut().get_mut::<SpanFields>() {
                if fields.log_id.is_some() {
                    existing.log_id = fields.log_id;
                }
                if !fields.rendered.is_empty() {
                    existing.rendered.push(' ');
                    existing.rendered.push_str(&fields.rendered);
                }
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };

        let mut log_id = None;
        let mut context = String::new();
        for span in scope.from_root() {
            let extensions = span.extensions();
            if let Some(fields) = extensions.get::<SpanFields>() {
                if fields.log_id.is_some() {
                    log_id = fields.log_id.clone();
                }
                let _ = write!(context, "{}{{{}}}:", span.name(), fields.rendered);
            }
        }
        let Some((file, threshold)) = log_id.and_then(|id| self.routes.target(&id)) else {
            return;
        };

        let level = *event.metadata().level();
        if level > threshold.to_level_filter() {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);
        let line = format_line(level, event.metadata().target(), &context, &fields);

        let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // A failing log write has nowhere to be reported.
        let _ = file.write_all(line.as_bytes());
    }
}

fn format_line(level: Level, target: &str, context: &str, fields: &FieldCollector) -> String {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let mut line = format!(
        "{}.{:03} {:>5} {}{}: {}",
        elapsed.as_secs(),
        elapsed.subsec_millis(),
        level,
        context,
        target,
        fields.message
    );
    if !fields.rendered.is_empty() {
        line.push(' ');
        line.push_str(&fields.rendered);
    }
    line.push('\n');
    line
}

fn install() -> Result<Arc<LogRoutes>> {
    let routes = Arc::new(LogRoutes::default());
    tracing_subscriber::registry()
        .with(FileRouter {
            routes: routes.clone(),
        })
        .try_init()
        .map_err(|err| DbhError::Logging(format!("failed to install log subscriber: {}", err)))?;
    Ok(routes)
}

/// Routes logs of handlers whose span carries `settings.id` to
/// `settings.filename`, at `settings.level`.
///
/// The subscriber is installed on the first call. Calling again with a new
/// id adds a file; calling with a known id points it at the new file.
/// Returns the path the id now writes to.
///
/// # Errors
///
/// Returns `DbhError::Logging` when the file name is empty or when another
/// global subscriber is already installed; `DbhError::Io` when the file
/// cannot be opened.
pub fn init_file_logging(settings: &LogSettings) -> Result<PathBuf> {
    let path = normalize_log_path(&settings.filename)?;
    let routes = ROUTES.get_or_try_init(install)?;
    routes.add(settings, &path)?;

    let span = info_span!("dbh", log_id = %settings.id);
    let _enter = span.enter();
    info!(file = %path.display(), "file logging started");
    Ok(path)
}

/// File that logs tagged with `log_id` are written to, if any.
pub fn log_file(log_id: &str) -> Option<PathBuf> {
    ROUTES.get().and_then(|routes| routes.path(log_id))
}

fn normalize_log_path(filename: &str) -> Result<PathBuf> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(DbhError::Logging("log filename cannot be empty".to_string()));
    }
    Ok(Path::new(trimmed).to_path_buf())
}
