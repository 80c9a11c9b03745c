use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{CancelToken, ProgressEvent, ProgressKind, ProgressSink};
use crate::domain::{RowKey, Step};
use crate::error::ArchiveError;

const EVENTS_MAX: usize = 12;
const STEPS: [Step; 6] = [
    Step::Resolving,
    Step::Planning,
    Step::Moving,
    Step::Publishing,
    Step::Notifying,
    Step::Recording,
];

#[derive(Debug)]
struct MonitorState {
    total: usize,
    finished: usize,
    done: usize,
    failed: usize,
    row: Option<RowKey>,
    step: Option<Step>,
    events: VecDeque<String>,
    started: Instant,
    cancelling: bool,
}

/// Full-screen progress view for a run, drawn while the pipeline works on
/// a background thread.
pub struct RunMonitor {
    state: Arc<Mutex<MonitorState>>,
    cancel: CancelToken,
    dry_run: bool,
}

struct MonitorProgress {
    state: Arc<Mutex<MonitorState>>,
}

impl ProgressSink for MonitorProgress {
    fn event(&self, event: ProgressEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match event.kind {
            ProgressKind::Batch { total } => state.total = total,
            ProgressKind::Step(step) => {
                state.row = event.row;
                state.step = Some(step);
                return;
            }
            ProgressKind::Done => {
                state.finished += 1;
                state.done += 1;
            }
            ProgressKind::Failed => {
                state.finished += 1;
                state.failed += 1;
            }
        }
        let row = event.row.map(|row| format!("{row}: ")).unwrap_or_default();
        let took = event
            .elapsed
            .map(|elapsed| format!(" ({} ms)", elapsed.as_millis()))
            .unwrap_or_default();
        let line = format!("[{}] {row}{}{took}", Local::now().format("%H:%M:%S"), event.message);
        state.events.push_back(line);
        while state.events.len() > EVENTS_MAX {
            state.events.pop_front();
        }
    }
}

impl RunMonitor {
    pub fn new(cancel: CancelToken, dry_run: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState {
                total: 0,
                finished: 0,
                done: 0,
                failed: 0,
                row: None,
                step: None,
                events: VecDeque::new(),
                started: Instant::now(),
                cancelling: false,
            })),
            cancel,
            dry_run,
        }
    }

    /// Runs `f` on a worker thread and returns its result once it finishes.
    /// `q`, `Esc` and `Ctrl-C` only request cancellation; the item in flight
    /// always completes.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, ArchiveError> + Send + 'static,
        R: Send + 'static,
    {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = mpsc::channel();
        let sink = MonitorProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let result = loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw(frame, &state, self.dry_run))
                    .into_diagnostic()?;
            }

            if let Some(result) = worker_result(&rx) {
                break result;
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    self.handle_key(key);
                }
            }
        };

        disable_raw_mode().into_diagnostic()?;
        io::stdout().execute(LeaveAlternateScreen).into_diagnostic()?;
        handle.join().ok();
        result.map_err(miette::Report::new)
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        let wants_cancel = match key.code {
            KeyCode::Char('q') | KeyCode::Esc => true,
            KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
            _ => false,
        };
        if wants_cancel {
            self.cancel.cancel();
            if let Ok(mut state) = self.state.lock() {
                state.cancelling = true;
            }
        }
    }
}

/// `None` while the worker is still running. A worker that died without
/// sending (a panic) ends the monitor with an error.
fn worker_result<R>(rx: &Receiver<Result<R, ArchiveError>>) -> Option<Result<R, ArchiveError>> {
    match rx.try_recv() {
        Ok(result) => Some(result),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => Some(Err(ArchiveError::Io(
            "run worker stopped without a result".to_string(),
        ))),
    }
}

fn draw(frame: &mut ratatui::Frame, state: &MonitorState, dry_run: bool) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(6),
            Constraint::Min(4),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let mode = if dry_run { "dry run" } else { "live" };
    let header = Line::from(vec![
        Span::styled(
            "SPECIMEN-ARCHIVER",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw(format!("   Mode: {mode}   Elapsed: {}s", state.started.elapsed().as_secs())),
    ]);
    frame.render_widget(
        Paragraph::new(header)
            .alignment(Alignment::Left)
            .block(Block::default().borders(Borders::BOTTOM)),
        chunks[0],
    );

    let current = match (state.row, state.step) {
        (Some(row), Some(step)) if state.finished < state.total => format!("{row}, {step}"),
        _ => "idle".to_string(),
    };
    let lines = vec![
        Line::from(vec![
            Span::styled("Progress: ", Style::default().fg(Color::Gray)),
            Span::raw(format!(
                "{} {}/{}",
                progress_bar(state.finished, state.total),
                state.finished,
                state.total
            )),
        ]),
        Line::from(vec![
            Span::styled("Current:  ", Style::default().fg(Color::Gray)),
            Span::styled(current, Style::default().fg(Color::Cyan)),
        ]),
        step_line(state.step),
        Line::from(vec![
            Span::styled("Done: ", Style::default().fg(Color::Gray)),
            Span::styled(state.done.to_string(), Style::default().fg(Color::Green)),
            Span::styled("   Failed: ", Style::default().fg(Color::Gray)),
            Span::styled(state.failed.to_string(), Style::default().fg(Color::Red)),
        ]),
    ];
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::BOTTOM)),
        chunks[1],
    );

    let events: Vec<Line> = state
        .events
        .iter()
        .rev()
        .map(|event| Line::from(event.clone()))
        .collect();
    frame.render_widget(
        Paragraph::new(events)
            .block(Block::default().title("Recent events"))
            .wrap(Wrap { trim: true }),
        chunks[2],
    );

    let footer = if state.cancelling {
        Span::styled(
            "cancelling after the current item...",
            Style::default().fg(Color::Yellow),
        )
    } else {
        Span::styled("q / Esc: stop after the current item", Style::default().fg(Color::Gray))
    };
    frame.render_widget(Paragraph::new(Line::from(footer)), chunks[3]);
}

fn step_line(current: Option<Step>) -> Line<'static> {
    let mut spans = vec![Span::styled("Steps:    ", Style::default().fg(Color::Gray))];
    for step in STEPS {
        let style = match current {
            Some(active) if active == step => Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
            Some(active) if active > step => Style::default().fg(Color::Green),
            _ => Style::default().fg(Color::DarkGray),
        };
        spans.push(Span::styled(step.as_str(), style));
        spans.push(Span::raw(" "));
    }
    Line::from(spans)
}

fn progress_bar(finished: usize, total: usize) -> String {
    let width = 20;
    let filled = if total == 0 {
        0
    } else {
        (finished.min(total) * width) / total
    };
    let mut out = String::from("[");
    for i in 0..width {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}
