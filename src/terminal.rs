// SPDX-License-Identifier: GPL-3.0-only

//! Terminal preview
//!
//! Draws the presented framebuffer with Unicode half-block characters for
//! double vertical resolution, with a status bar for the toggle label and the
//! FPS readout.

use crate::app::PreviewApp;
use crate::config::Config;
use crate::constants::timing::INPUT_POLL;
use crate::gpu::PresentedFrame;

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal, backend::CrosstermBackend, buffer::Buffer, layout::Rect, style::Color,
    style::Style, widgets::Widget,
};
use std::io::{self, stdout};
use tracing::{error, info};

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Toggle,
    PauseResume,
    Quit,
    None,
}

fn key_action(key: &KeyEvent) -> KeyAction {
    if key.kind != KeyEventKind::Press {
        return KeyAction::None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Quit,
        KeyCode::Char('q') => KeyAction::Quit,
        KeyCode::Char('e') | KeyCode::Char(' ') => KeyAction::Toggle,
        KeyCode::Char('p') => KeyAction::PauseResume,
        _ => KeyAction::None,
    }
}

/// Run the terminal preview until the user quits
pub fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut app = PreviewApp::new(config)?;
    app.resume()?;

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(e) = app.pause() {
        error!(error = %e, "Failed to pause preview on exit");
    }
    result
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut PreviewApp,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut frame_widget = FrameWidget::default();

    loop {
        app.poll();
        if let Some(frame) = app.latest_frame() {
            frame_widget.frame = Some(frame);
        }
        let status_message = build_status_message(app);

        terminal.draw(|f| {
            let area = f.area();

            // Reserve bottom line for status
            let preview_area = Rect {
                x: area.x,
                y: area.y,
                width: area.width,
                height: area.height.saturating_sub(1),
            };
            f.render_widget(&frame_widget, preview_area);

            let status_area = Rect {
                x: area.x,
                y: area.height.saturating_sub(1),
                width: area.width,
                height: 1,
            };
            f.render_widget(
                StatusBar {
                    message: &status_message,
                },
                status_area,
            );
        })?;

        if !event::poll(INPUT_POLL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        match key_action(&key) {
            KeyAction::Quit => break,
            KeyAction::Toggle => {
                app.toggle_mode();
            }
            KeyAction::PauseResume => {
                let result = if app.is_paused() {
                    app.resume()
                } else {
                    app.pause()
                };
                if let Err(e) = result {
                    error!(error = %e, "Lifecycle change failed");
                }
                info!(paused = app.is_paused(), "Preview lifecycle changed");
            }
            KeyAction::None => {}
        }
    }

    Ok(())
}

fn build_status_message(app: &PreviewApp) -> String {
    let mut msg = format!("{} | [e] {}", app.fps_text(), app.toggle_label());
    msg.push_str(if app.is_paused() {
        " | [p] resume"
    } else {
        " | [p] pause"
    });
    msg.push_str(" | [q] quit");
    if let Some(status) = app.status() {
        msg.push_str(" | ");
        msg.push_str(status);
    }
    msg
}

/// Widget that renders a presented frame using half-block characters
#[derive(Default)]
struct FrameWidget {
    frame: Option<PresentedFrame>,
}

impl Widget for &FrameWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(frame) = self.frame.as_ref().filter(|f| f.width > 0 && f.height > 0) else {
            let msg = "Waiting for camera...";
            let x = area.x + (area.width.saturating_sub(msg.len() as u16)) / 2;
            let y = area.y + area.height / 2;
            if y < area.y + area.height && x < area.x + area.width {
                buf.set_string(x, y, msg, Style::default());
            }
            return;
        };

        // Each terminal cell displays 2 vertical pixels
        let frame_aspect = frame.width as f64 / frame.height as f64;
        let term_width = area.width as f64;
        let term_height = (area.height * 2) as f64;

        let (display_width, display_height) = if term_width / term_height > frame_aspect {
            let h = term_height;
            let w = h * frame_aspect;
            (w as u16, (h / 2.0) as u16)
        } else {
            let w = term_width;
            let h = w / frame_aspect;
            (w as u16, (h / 2.0) as u16)
        };
        if display_width == 0 || display_height == 0 {
            return;
        }

        let x_offset = area.x + (area.width.saturating_sub(display_width)) / 2;
        let y_offset = area.y + (area.height.saturating_sub(display_height)) / 2;

        let x_scale = frame.width as f64 / display_width as f64;
        let y_scale = frame.height as f64 / (display_height * 2) as f64;

        // Upper half (▀) takes the fg colour, lower half the bg colour
        for ty in 0..display_height {
            for tx in 0..display_width {
                let term_x = x_offset + tx;
                let term_y = y_offset + ty;

                let src_x = (tx as f64 * x_scale) as u32;
                let src_y_top = (ty as f64 * 2.0 * y_scale) as u32;
                let src_y_bottom = ((ty as f64 * 2.0 + 1.0) * y_scale) as u32;

                let top_color = sample_pixel(frame, src_x, src_y_top);
                let bottom_color = sample_pixel(frame, src_x, src_y_bottom);

                if let Some(cell) = buf.cell_mut((term_x, term_y)) {
                    cell.set_char('▀');
                    cell.set_fg(top_color);
                    cell.set_bg(bottom_color);
                }
            }
        }
    }
}

fn sample_pixel(frame: &PresentedFrame, x: u32, y: u32) -> Color {
    let x = x.min(frame.width.saturating_sub(1));
    let y = y.min(frame.height.saturating_sub(1));
    match frame.pixel(x, y) {
        Some([r, g, b, _]) => Color::Rgb(r, g, b),
        None => Color::Black,
    }
}

/// Status bar widget
struct StatusBar<'a> {
    message: &'a str,
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_bg(Color::DarkGray);
            }
        }

        let text: String = self.message.chars().take(area.width as usize).collect();
        buf.set_string(
            area.x,
            area.y,
            text,
            Style::default().fg(Color::White).bg(Color::DarkGray),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_key_bindings() {
        let none = KeyModifiers::NONE;
        assert_eq!(key_action(&press(KeyCode::Char('e'), none)), KeyAction::Toggle);
        assert_eq!(key_action(&press(KeyCode::Char(' '), none)), KeyAction::Toggle);
        assert_eq!(key_action(&press(KeyCode::Char('p'), none)), KeyAction::PauseResume);
        assert_eq!(key_action(&press(KeyCode::Char('q'), none)), KeyAction::Quit);
        assert_eq!(
            key_action(&press(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            KeyAction::Quit
        );
        assert_eq!(key_action(&press(KeyCode::Char('c'), none)), KeyAction::None);
    }

    #[test]
    fn test_frame_widget_half_blocks() {
        // Top row red, bottom row blue
        let frame = PresentedFrame {
            width: 2,
            height: 2,
            data: vec![
                255, 0, 0, 255, 255, 0, 0, 255, //
                0, 0, 255, 255, 0, 0, 255, 255,
            ],
        };
        let widget = FrameWidget { frame: Some(frame) };
        let area = Rect::new(0, 0, 2, 1);
        let mut buf = Buffer::empty(area);
        (&widget).render(area, &mut buf);

        let cell = buf.cell((0, 0)).unwrap();
        assert_eq!(cell.symbol(), "▀");
        assert_eq!(cell.fg, Color::Rgb(255, 0, 0));
        assert_eq!(cell.bg, Color::Rgb(0, 0, 255));
    }

    #[test]
    fn test_status_bar_truncates() {
        let area = Rect::new(0, 0, 5, 1);
        let mut buf = Buffer::empty(area);
        StatusBar {
            message: "FPS: 30.00",
        }
        .render(area, &mut buf);
        assert_eq!(buf.cell((3, 0)).unwrap().symbol(), ":");
        assert_eq!(buf.cell((4, 0)).unwrap().symbol(), " ");
    }
}
