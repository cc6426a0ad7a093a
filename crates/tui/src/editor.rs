use ratatui::style::{Modifier, Style};
use tui_textarea::{CursorMove, Input, TextArea};

/// Multi-line JSON buffer behind the insert and edit dialogs.
#[derive(Debug, Clone)]
pub(crate) struct JsonEditor {
    textarea: TextArea<'static>,
}

impl JsonEditor {
    /// Cursor starts on the first line, at its end.
    pub(crate) fn at_top(text: &str) -> Self {
        Self::with_cursor(text, 0)
    }

    /// Cursor starts at the end of the second line, which is the empty
    /// body of the insert template.
    pub(crate) fn in_body(text: &str) -> Self {
        Self::with_cursor(text, 1)
    }

    fn with_cursor(text: &str, row: u16) -> Self {
        let mut textarea = TextArea::new(text.split('\n').map(str::to_string).collect());
        textarea.set_cursor_line_style(Style::default());
        textarea.set_cursor_style(Style::default().add_modifier(Modifier::REVERSED));
        textarea.move_cursor(CursorMove::Jump(row, 0));
        textarea.move_cursor(CursorMove::End);
        Self { textarea }
    }

    pub(crate) fn text(&self) -> String {
        self.textarea.lines().join("\n")
    }

    pub(crate) fn textarea(&self) -> &TextArea<'static> {
        &self.textarea
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> (usize, usize) {
        self.textarea.cursor()
    }

    pub(crate) fn input(&mut self, input: Input) {
        self.textarea.input(input);
    }

    pub(crate) fn insert_char(&mut self, ch: char) {
        self.textarea.insert_char(ch);
    }

    pub(crate) fn backspace(&mut self) {
        self.textarea.delete_char();
    }
}

#[cfg(test)]
mod tests {
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    use super::JsonEditor;

    fn press(editor: &mut JsonEditor, code: KeyCode) {
        editor.input(KeyEvent::new(code, KeyModifiers::NONE).into());
    }

    #[test]
    fn insert_template_cursor_lands_inside_the_braces() {
        let mut editor = JsonEditor::in_body("{\n  \n}");
        assert_eq!(editor.cursor(), (1, 2));

        for ch in "\"a\": 1".chars() {
            editor.insert_char(ch);
        }
        assert_eq!(editor.text(), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn arrow_keys_move_within_the_text() {
        let mut editor = JsonEditor::at_top("{\n  \"a\": 1,\n  \"b\": 2\n}");
        press(&mut editor, KeyCode::Down);
        press(&mut editor, KeyCode::End);
        press(&mut editor, KeyCode::Left);
        press(&mut editor, KeyCode::Backspace);
        editor.insert_char('7');

        assert_eq!(editor.text(), "{\n  \"a\": 7,\n  \"b\": 2\n}");
        press(&mut editor, KeyCode::Home);
        assert_eq!(editor.cursor(), (1, 0));
    }

    #[test]
    fn newline_splits_the_current_line() {
        let mut editor = JsonEditor::at_top("{}");
        press(&mut editor, KeyCode::Left);
        press(&mut editor, KeyCode::Enter);
        assert_eq!(editor.text(), "{\n}");
    }
}
