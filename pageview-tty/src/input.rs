use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use pageview_core::Command;

/// Terminal cell under the mouse pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellPosition {
    pub column: u16,
    pub row: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Command(Command),
    /// Scroll wheel zoom around a cell.
    ZoomAt { at: CellPosition, factor: f64 },
    BeginSelection { at: CellPosition },
    ExtendSelection { at: CellPosition },
    SelectWord { at: CellPosition },
    /// Press and release without a drag in between.
    Click { at: CellPosition },
    CopySelection,
    Resize { columns: u16, rows: u16 },
    Quit,
    None,
}

/// Turns terminal events into viewer operations, keeping a vi-style numeric prefix
/// between key presses.
#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<u32>,
    pending_digits: String,
    pressed: Option<CellPosition>,
    dragging: bool,
}

impl EventMapper {
    /// Viewport units per pan step.
    pub const PAN_STEP: f64 = 48.0;
    pub const WHEEL_STEP: f64 = 96.0;
    pub const WHEEL_ZOOM: f64 = 1.25;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(key) => self.map_key(key),
            Event::Mouse(mouse) => self.map_mouse(mouse),
            Event::Resize(columns, rows) => UiEvent::Resize { columns, rows },
            _ => UiEvent::None,
        }
    }

    fn map_key(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit);
                }
                UiEvent::None
            }
            (KeyCode::Left, modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.pan(-Self::PAN_STEP, 0.0)
            }
            (KeyCode::Right, modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.pan(Self::PAN_STEP, 0.0)
            }
            (KeyCode::Up, modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.pan(0.0, -Self::PAN_STEP)
            }
            (KeyCode::Down, modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.pan(0.0, Self::PAN_STEP)
            }
            (KeyCode::Char('H'), KeyModifiers::SHIFT)
            | (KeyCode::Char('h'), KeyModifiers::NONE)
            | (KeyCode::Left, KeyModifiers::NONE) => self.pan(-Self::PAN_STEP, 0.0),
            (KeyCode::Char('L'), KeyModifiers::SHIFT)
            | (KeyCode::Char('l'), KeyModifiers::NONE)
            | (KeyCode::Right, KeyModifiers::NONE) => self.pan(Self::PAN_STEP, 0.0),
            (KeyCode::Char('K'), KeyModifiers::SHIFT) => self.pan(0.0, -Self::PAN_STEP),
            (KeyCode::Char('J'), KeyModifiers::SHIFT) => self.pan(0.0, Self::PAN_STEP),
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Down, KeyModifiers::NONE)
            | (KeyCode::PageDown, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::NextPage { count })
            }
            (KeyCode::Char('k'), KeyModifiers::NONE)
            | (KeyCode::Up, KeyModifiers::NONE)
            | (KeyCode::PageUp, _) => {
                let count = self.take_count();
                UiEvent::Command(Command::PrevPage { count })
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                match self.take_explicit_count() {
                    Some(page) => UiEvent::Command(Command::GotoPage { page }),
                    None => UiEvent::Command(Command::FirstPage),
                }
            }
            (KeyCode::Char('G'), KeyModifiers::SHIFT) | (KeyCode::End, _) => {
                match self.take_explicit_count() {
                    Some(page) => UiEvent::Command(Command::GotoPage { page }),
                    None => UiEvent::Command(Command::LastPage),
                }
            }
            (KeyCode::Char('+'), _) => {
                self.reset_count();
                UiEvent::Command(Command::ZoomIn { wrap: false })
            }
            (KeyCode::Char('-'), _) => {
                self.reset_count();
                UiEvent::Command(Command::ZoomOut { wrap: false })
            }
            (KeyCode::Char('z'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::ZoomIn { wrap: true })
            }
            (KeyCode::Char('='), _) => {
                self.reset_count();
                UiEvent::Command(Command::FitPage)
            }
            (KeyCode::Char('a'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Command(Command::SelectAll)
            }
            (KeyCode::Esc, _) => {
                self.reset_count();
                UiEvent::Command(Command::ClearSelection)
            }
            (KeyCode::Char('y'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::CopySelection
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.reset_count();
                UiEvent::CopySelection
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent) -> UiEvent {
        let at = CellPosition {
            column: mouse.column,
            row: mouse.row,
        };
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                self.pressed = Some(at);
                self.dragging = false;
                UiEvent::None
            }
            MouseEventKind::Drag(MouseButton::Left) => match self.pressed {
                Some(start) if !self.dragging => {
                    self.dragging = true;
                    UiEvent::BeginSelection { at: start }
                }
                Some(_) => UiEvent::ExtendSelection { at },
                None => UiEvent::None,
            },
            MouseEventKind::Up(MouseButton::Left) => {
                let dragged = std::mem::take(&mut self.dragging);
                match self.pressed.take() {
                    Some(_) if dragged => UiEvent::ExtendSelection { at },
                    Some(start) => UiEvent::Click { at: start },
                    None => UiEvent::None,
                }
            }
            MouseEventKind::Down(MouseButton::Right) => UiEvent::SelectWord { at },
            MouseEventKind::ScrollUp if mouse.modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::ZoomAt {
                    at,
                    factor: Self::WHEEL_ZOOM,
                }
            }
            MouseEventKind::ScrollDown if mouse.modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::ZoomAt {
                    at,
                    factor: 1.0 / Self::WHEEL_ZOOM,
                }
            }
            MouseEventKind::ScrollUp => UiEvent::Command(Command::ScrollBy {
                dx: 0.0,
                dy: -Self::WHEEL_STEP,
            }),
            MouseEventKind::ScrollDown => UiEvent::Command(Command::ScrollBy {
                dx: 0.0,
                dy: Self::WHEEL_STEP,
            }),
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: u32) {
        let current = self.pending_count.unwrap_or(0);
        self.pending_count = Some(current.saturating_mul(10).saturating_add(digit));
        if let Some(c) = char::from_digit(digit, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_explicit_count(&mut self) -> Option<u32> {
        let count = self.pending_count.take().filter(|&count| count > 0);
        self.pending_digits.clear();
        count
    }

    fn take_count(&mut self) -> u32 {
        self.take_explicit_count().unwrap_or(1)
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    fn pan(&mut self, dx: f64, dy: f64) -> UiEvent {
        let multiplier = self.take_count() as f64;
        UiEvent::Command(Command::ScrollBy {
            dx: dx * multiplier,
            dy: dy * multiplier,
        })
    }

    /// Digits typed so far, for the status line.
    pub fn pending_input(&self) -> Option<&str> {
        (!self.pending_digits.is_empty()).then_some(self.pending_digits.as_str())
    }
}
