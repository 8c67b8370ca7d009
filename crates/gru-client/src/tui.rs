use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use gru_core::{ConnectionStatus, Key, Page, SessionEvent, Snapshot};
use ratatui::prelude::*;
use ratatui::widgets::*;
use tokio::sync::{mpsc, watch};

// ---------------------------------------------------------------------------
// Terminal cleanup guard
// ---------------------------------------------------------------------------

/// Restores the terminal when dropped, including on panic or early `?`.
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

// ---------------------------------------------------------------------------
// Keyboard
// ---------------------------------------------------------------------------

/// Decode a terminal key press. Releases, repeats and keys the quiz never
/// binds map to `None`.
pub fn map_key(event: &KeyEvent) -> Option<Key> {
    if event.kind != KeyEventKind::Press {
        return None;
    }
    let ctrl = event.modifiers.contains(KeyModifiers::CONTROL);
    match event.code {
        KeyCode::Char('q') if ctrl => Some(Key::CtrlQ),
        KeyCode::Char('c') if ctrl => Some(Key::CtrlC),
        KeyCode::Char(_) if ctrl => None,
        KeyCode::Char(c) => Some(Key::Char(c)),
        KeyCode::Enter => Some(Key::Enter),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Draw snapshots and forward key presses until the snapshot channel closes.
pub async fn run_tui(
    mut snapshots: watch::Receiver<Option<Snapshot>>,
    keys: mpsc::Sender<SessionEvent>,
) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let _guard = TerminalGuard;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    loop {
        let current = snapshots.borrow_and_update().clone();
        terminal.draw(|frame| render(frame, current.as_ref()))?;

        tokio::select! {
            // Short poll so keys stay responsive between snapshots.
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                while event::poll(Duration::from_millis(0))? {
                    if let Event::Key(key) = event::read()? {
                        if let Some(key) = map_key(&key) {
                            tracing::trace!(%key, "key pressed");
                            // The session may already be gone; keys are moot then.
                            let _ = keys.send(SessionEvent::Key(key)).await;
                        }
                    }
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    terminal.show_cursor()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn boxed(title: &str) -> Block<'static> {
    Block::default()
        .title(format!(" {title} "))
        .borders(Borders::ALL)
}

/// A `width_pct` wide, `height` tall rect in the middle of `area`.
fn centered(area: Rect, width_pct: u16, height: u16) -> Rect {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Fill(1),
            Constraint::Length(height),
            Constraint::Fill(1),
        ])
        .split(area);
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - width_pct) / 2),
            Constraint::Percentage(width_pct),
            Constraint::Fill(1),
        ])
        .split(rows[1]);
    cols[1]
}

fn render(frame: &mut Frame, snapshot: Option<&Snapshot>) {
    let Some(s) = snapshot else {
        render_notice(frame, "Connecting", "Connecting to the quiz server...", Color::Yellow);
        return;
    };
    match s.page {
        Page::Instructions => render_instructions(frame, s),
        Page::Demo | Page::Test => render_question_page(frame, s),
        Page::Final => render_final(frame, s),
        Page::Error => render_notice(
            frame,
            "Error",
            s.message.as_deref().unwrap_or_default(),
            Color::Red,
        ),
    }
}

fn render_notice(frame: &mut Frame, title: &str, text: &str, color: Color) {
    let area = centered(frame.area(), 50, 12);
    let notice = Paragraph::new(text.to_string())
        .wrap(Wrap { trim: true })
        .block(boxed(title).border_style(Style::default().fg(color)).padding(Padding::uniform(1)));
    frame.render_widget(notice, area);
}

fn status_box(s: &Snapshot) -> Paragraph<'_> {
    let color = match s.connection {
        ConnectionStatus::Healthy => Color::Green,
        ConnectionStatus::Degraded => Color::Red,
    };
    Paragraph::new(s.status_line.as_str())
        .style(Style::default().fg(color))
        .block(boxed("Status"))
}

fn bullets(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|l| format!("- {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_instructions(frame: &mut Frame, s: &Snapshot) {
    let minutes = s.test_duration.as_secs() / 60;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5), // Terminal
            Constraint::Length(9), // General
            Constraint::Length(5), // Scoring
            Constraint::Length(4), // Contact
            Constraint::Length(2), // Prompt
            Constraint::Length(3), // Status
            Constraint::Min(0),
        ])
        .split(frame.area());

    let terminal = bullets(&[
        "Please make sure you can see all four borders of every box on this page.",
        "If you can't, enlarge the terminal or use a smaller font before you continue.",
    ]);
    let duration = format!("The quiz lasts {minutes} mins. The time left is always shown.");
    let general = bullets(&[
        "By taking this quiz you agree not to discuss or post the questions shown here.",
        duration.as_str(),
        "Once started, the timer does not stop, whatever happens on the client side.",
        "Questions can have one or several correct answers. They are marked accordingly.",
        "Your total score and the time left are displayed at the top at all times.",
        "The scoring for each question is shown in a separate box.",
        "Press Ctrl-q at any point to end the quiz.",
    ]);
    let scoring = bullets(&[
        "Wrong answers score NEGATIVE points. Please DO NOT GUESS.",
        "A skipped question always scores zero.",
        "The scoring is shown next to each question.",
    ]);
    let contact = bullets(&["If anything is unclear or broken, do not start. Contact the quiz administrator first."]);

    let sections = [
        ("Terminal", terminal),
        ("General", general),
        ("Scoring", scoring),
        ("Contact", contact),
    ];
    for (i, (title, text)) in sections.into_iter().enumerate() {
        let p = Paragraph::new(text).wrap(Wrap { trim: false }).block(boxed(title));
        frame.render_widget(p, chunks[i]);
    }

    let prompt = Paragraph::new(format!("  {}", s.start_prompt())).style(Style::default().fg(Color::Cyan));
    frame.render_widget(prompt, chunks[4]);
    frame.render_widget(status_box(s), chunks[5]);
}

fn render_question_page(frame: &mut Frame, s: &Snapshot) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Counters
            Constraint::Min(8),    // Question + scoring
            Constraint::Length(3), // Status
            Constraint::Length(1), // Help
        ])
        .split(frame.area());

    let counters = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 4); 4])
        .split(chunks[0]);
    let boxes = [
        ("Total Time Left", s.time_left_display()),
        ("Time spent", s.time_spent_display()),
        ("Total Score", s.score_display()),
        ("Last Score", s.last_score_display()),
    ];
    for (i, (title, value)) in boxes.into_iter().enumerate() {
        frame.render_widget(Paragraph::new(value).block(boxed(title)), counters[i]);
    }

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
        .split(chunks[1]);
    let title = if s.page == Page::Demo {
        "Question (demo)"
    } else {
        "Question"
    };

    match &s.question {
        Some(q) => {
            let mut lines = vec![Line::from(q.text.clone()), Line::from("")];
            for option in &q.options {
                let mark = if option.selected { "[x]" } else { "[ ]" };
                let style = if option.selected {
                    Style::default().fg(Color::Cyan).bold()
                } else {
                    Style::default()
                };
                lines.push(Line::styled(format!("{mark} {}) {}", option.key, option.text), style));
            }
            let question = Paragraph::new(lines).wrap(Wrap { trim: false }).block(boxed(title));
            frame.render_widget(question, body[0]);
            let scoring = Paragraph::new(q.scoring_info.as_str())
                .wrap(Wrap { trim: false })
                .block(boxed("Scoring"));
            frame.render_widget(scoring, body[1]);
        }
        None => {
            let waiting = Paragraph::new("Waiting for the next question...").block(boxed(title));
            frame.render_widget(waiting, body[0]);
            frame.render_widget(boxed("Scoring"), body[1]);
        }
    }

    frame.render_widget(status_box(s), chunks[2]);

    let end = if s.page == Page::Demo {
        "end demo"
    } else {
        "end quiz"
    };
    let help = Paragraph::new(format!(
        " a-e: select | Enter: submit (nothing selected skips) | Ctrl-q: {end}"
    ));
    frame.render_widget(help, chunks[3]);
}

fn render_final(frame: &mut Frame, s: &Snapshot) {
    let text = format!(
        "{}\n\nTime spent: {}\nTotal score: {}",
        s.message.as_deref().unwrap_or_default(),
        s.time_spent_display(),
        s.score_display()
    );
    render_notice(frame, "Thank You", &text, Color::Cyan);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
