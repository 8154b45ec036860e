use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal;
use directories::ProjectDirs;
use pageview_core::{
    ClipboardSink, Command, DocumentRegistry, DocumentSource, FileStateStore, LinkTarget, Point,
    Size, StateStore, Viewer, ViewerConfig, ViewerEvent,
};
use pageview_render::{compose_frame, PdfRenderFactory};
use pageview_tty::{CellPosition, EventMapper, Frame, KittyPresenter, Placement, UiEvent};
use tracing::{debug, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

/// Cell size assumed when the terminal does not report pixel dimensions.
const FALLBACK_CELL: (f64, f64) = (8.0, 16.0);

#[derive(Debug, Parser)]
#[command(
    name = "pageview",
    version,
    about = "Continuous-scroll PDF viewer for kitty-compatible terminals"
)]
struct Args {
    /// Page to open on (1-based). Overrides the remembered position.
    #[arg(short = 'p', long = "page")]
    page: Option<u32>,

    /// Config file to use instead of the one in the platform config directory
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Render pages with inverted colors
    #[arg(long)]
    dark: bool,

    /// PDF file to open
    file: PathBuf,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        crossterm::execute!(io::stdout(), EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

/// System clipboard. Missing on headless sessions, in which case copies are dropped
/// with a warning.
struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    fn new() -> Self {
        let inner = match arboard::Clipboard::new() {
            Ok(clipboard) => Some(clipboard),
            Err(err) => {
                warn!(error = %err, "clipboard unavailable");
                None
            }
        };
        Self { inner }
    }
}

impl ClipboardSink for SystemClipboard {
    fn set_text(&mut self, text: String) -> Result<()> {
        let clipboard = self
            .inner
            .as_mut()
            .ok_or_else(|| anyhow!("no clipboard available"))?;
        clipboard.set_text(text)?;
        Ok(())
    }
}

/// Terminal geometry. The viewport is measured in terminal pixels and covers every
/// row except the status line.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Screen {
    columns: u16,
    rows: u16,
    cell_width: f64,
    cell_height: f64,
}

impl Screen {
    fn query() -> Result<Self> {
        let window = terminal::window_size()?;
        Ok(Self::from_window(
            window.columns,
            window.rows,
            window.width,
            window.height,
        ))
    }

    fn from_window(columns: u16, rows: u16, width: u16, height: u16) -> Self {
        let columns = columns.max(1);
        let rows = rows.max(1);
        let (cell_width, cell_height) = if width == 0 || height == 0 {
            FALLBACK_CELL
        } else {
            (
                f64::from(width) / f64::from(columns),
                f64::from(height) / f64::from(rows),
            )
        };
        Self {
            columns,
            rows,
            cell_width,
            cell_height,
        }
    }

    fn image_rows(&self) -> u16 {
        self.rows.saturating_sub(1).max(1)
    }

    /// Cells the viewer frame covers: everything above the status row.
    fn placement(&self) -> Placement {
        Placement::clamped(0, 0, self.columns, self.image_rows())
    }

    fn viewport(&self) -> Size {
        Size::new(
            f64::from(self.columns) * self.cell_width,
            f64::from(self.image_rows()) * self.cell_height,
        )
    }

    /// Center of a cell, in viewport units.
    fn cell_center(&self, at: CellPosition) -> Point {
        Point::new(
            (f64::from(at.column) + 0.5) * self.cell_width,
            (f64::from(at.row) + 0.5) * self.cell_height,
        )
    }
}

enum LoopAction {
    Continue,
    Redraw,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pageview", "pageview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let mut config = load_config(&args, &project_dirs)?;
    if let Some(page) = args.page {
        config.initial_page = page;
    }
    config.dark_mode |= args.dark;

    let store = FileStateStore::new(project_dirs.data_local_dir().join("state"))?;
    let registry = DocumentRegistry::new();
    let provider = PdfRenderFactory::new()?;
    let source = DocumentSource::file(&args.file);
    let document = registry
        .attach(&source, &provider)
        .await
        .with_context(|| format!("failed to open {:?}", args.file))?;

    let mut screen = Screen::query()?;
    let viewer = Viewer::new(config);
    viewer.set_viewport_size(screen.viewport());
    viewer.set_document(Some(document), Some(source.clone()));
    if args.page.is_none() {
        restore_position(&viewer, &store, &source);
    }

    let result = run(&viewer, &mut screen).await;

    save_position(&viewer, &store, &source);
    viewer.dispose();
    registry.detach(&source);
    result
}

async fn run(viewer: &Viewer, screen: &mut Screen) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let mut presenter = KittyPresenter::new(io::stdout());
    let mut mapper = EventMapper::new();
    let mut clipboard = SystemClipboard::new();
    let events = viewer.events();
    let mut message: Option<String> = None;
    let mut dirty = true;

    presenter.clear()?;
    loop {
        for event in events.drain() {
            debug!(?event, "viewer event");
            match event {
                ViewerEvent::DocumentChanged => message = None,
                ViewerEvent::ViewSizeChanged { .. } => presenter.clear()?,
                _ => {}
            }
            dirty = true;
        }

        if dirty {
            redraw(&mut presenter, viewer, screen, &mapper, message.as_deref())?;
            dirty = false;
        }

        if !event::poll(Duration::from_millis(16))? {
            continue;
        }
        let ui_event = mapper.map_event(event::read()?);
        if mapper.pending_input().is_some() {
            dirty = true;
        }
        match handle_event(ui_event, viewer, screen, &mut clipboard, &mut message).await {
            Ok(LoopAction::Continue) => {}
            Ok(LoopAction::Redraw) => dirty = true,
            Ok(LoopAction::Quit) => break,
            Err(err) => {
                warn!(error = %err, "command failed");
                message = Some(err.to_string());
                dirty = true;
            }
        }
    }

    presenter.clear()?;
    Ok(())
}

async fn handle_event(
    event: UiEvent,
    viewer: &Viewer,
    screen: &mut Screen,
    clipboard: &mut SystemClipboard,
    message: &mut Option<String>,
) -> Result<LoopAction> {
    let to_document = |at: CellPosition| viewer.viewport_to_document(screen.cell_center(at));
    match event {
        UiEvent::Command(command) => {
            let animated = !matches!(
                command,
                Command::ScrollBy { .. }
                    | Command::ZoomAt { .. }
                    | Command::SelectAll
                    | Command::ClearSelection
            );
            if animated {
                // animations run detached so input keeps flowing; a newer one
                // supersedes the old
                let viewer = viewer.clone();
                tokio::spawn(async move {
                    if let Err(err) = viewer.apply(command).await {
                        warn!(error = %err, "navigation failed");
                    }
                });
            } else {
                viewer.apply(command).await?;
            }
            Ok(LoopAction::Redraw)
        }
        UiEvent::ZoomAt { at, factor } => {
            viewer.zoom_at(screen.cell_center(at), factor);
            Ok(LoopAction::Redraw)
        }
        UiEvent::BeginSelection { at } => {
            viewer.begin_selection(to_document(at)).await?;
            Ok(LoopAction::Redraw)
        }
        UiEvent::ExtendSelection { at } => {
            viewer.extend_selection(to_document(at)).await?;
            Ok(LoopAction::Redraw)
        }
        UiEvent::SelectWord { at } => {
            viewer.select_word(to_document(at)).await?;
            Ok(LoopAction::Redraw)
        }
        UiEvent::Click { at } => {
            match viewer.follow_link(to_document(at)).await? {
                Some(LinkTarget::Uri(uri)) => match Url::parse(&uri) {
                    Ok(url) => {
                        info!(%url, scheme = url.scheme(), "link activated");
                        *message = Some(url.to_string());
                    }
                    Err(err) => {
                        warn!(%uri, error = %err, "link has an invalid uri");
                        *message = Some(format!("invalid link: {uri}"));
                    }
                },
                Some(LinkTarget::Destination(destination)) => {
                    debug!(?destination, "followed internal link");
                }
                None => viewer.clear_selection(),
            }
            Ok(LoopAction::Redraw)
        }
        UiEvent::CopySelection => {
            *message = Some(if viewer.copy_selection(clipboard) {
                "copied".to_string()
            } else {
                "nothing copied".to_string()
            });
            Ok(LoopAction::Redraw)
        }
        UiEvent::Resize { columns, rows } => {
            let window = terminal::window_size()?;
            *screen = Screen::from_window(columns, rows, window.width, window.height);
            viewer.set_viewport_size(screen.viewport());
            Ok(LoopAction::Redraw)
        }
        UiEvent::Quit => Ok(LoopAction::Quit),
        UiEvent::None => Ok(LoopAction::Continue),
    }
}

fn redraw(
    presenter: &mut KittyPresenter<io::Stdout>,
    viewer: &Viewer,
    screen: &Screen,
    mapper: &EventMapper,
    message: Option<&str>,
) -> Result<()> {
    let image = compose_frame(viewer, 1.0);
    let status = status_line(viewer, mapper.pending_input(), message);
    let outcome = presenter.present(&Frame {
        image: &image,
        placement: screen.placement(),
        status: &status,
    })?;
    trace!(?outcome, "frame presented");
    Ok(())
}

fn status_line(viewer: &Viewer, pending: Option<&str>, message: Option<&str>) -> String {
    if let Some(failure) = viewer.document_error() {
        return format!("error: {}", failure.message);
    }
    let name = viewer
        .source()
        .map(|source| source.display_name())
        .unwrap_or_default();
    let mut status = format!(
        "{}  {}/{}  {:.0}%",
        name,
        viewer.current_page().unwrap_or(0),
        viewer.page_count(),
        viewer.transform().scale * 100.0
    );
    if let Some(pending) = pending {
        status.push_str("  ");
        status.push_str(pending);
    }
    if let Some(message) = message {
        status.push_str("  ");
        status.push_str(message);
    }
    status
}

fn load_config(args: &Args, project_dirs: &ProjectDirs) -> Result<ViewerConfig> {
    if let Some(path) = &args.config {
        return ViewerConfig::load(path);
    }
    let path = project_dirs.config_dir().join("config.toml");
    if path.exists() {
        ViewerConfig::load(&path)
    } else {
        Ok(ViewerConfig::default())
    }
}

fn restore_position(viewer: &Viewer, store: &dyn StateStore, source: &DocumentSource) {
    let saved = match store.load(&source.id()) {
        Ok(Some(saved)) => saved,
        Ok(None) => return,
        Err(err) => {
            warn!(error = %err, "failed to load saved position");
            return;
        }
    };
    if let Err(err) = viewer.restore_view_state(&saved) {
        warn!(error = %err, "failed to restore saved position");
    }
}

fn save_position(viewer: &Viewer, store: &dyn StateStore, source: &DocumentSource) {
    let Some(state) = viewer.view_state() else {
        return;
    };
    if let Err(err) = store.save(&source.id(), &state) {
        warn!(error = %err, "failed to save position");
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pageview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // the terminal is the UI, so logs only go to the file
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_reserves_status_row() {
        let screen = Screen::from_window(80, 25, 800, 500);
        assert_eq!(screen.cell_width, 10.0);
        assert_eq!(screen.cell_height, 20.0);
        assert_eq!(screen.viewport(), Size::new(800.0, 480.0));
        let placement = screen.placement();
        assert_eq!((placement.columns, placement.rows), (80, 24));
        assert_eq!(placement.status_row(), 24);
    }

    #[test]
    fn screen_falls_back_without_pixel_size() {
        let screen = Screen::from_window(10, 5, 0, 0);
        assert_eq!(screen.viewport(), Size::new(80.0, 64.0));
        let center = screen.cell_center(CellPosition { column: 1, row: 2 });
        assert_eq!(center, Point::new(12.0, 40.0));
    }

    #[test]
    fn args_accept_page_and_config() {
        let args = Args::try_parse_from(["pageview", "-p", "4", "--config", "x.toml", "a.pdf"])
            .unwrap();
        assert_eq!(args.page, Some(4));
        assert_eq!(args.config, Some(PathBuf::from("x.toml")));
        assert_eq!(args.file, PathBuf::from("a.pdf"));
        assert!(!args.dark);
    }
}
