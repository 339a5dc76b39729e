use opencv::core::Size;
use opencv::highgui;
use opencv::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyCommand {
    Quit,
    TogglePause,
}

impl KeyCommand {
    pub fn from_code(code: i32) -> Option<Self> {
        if code < 0 {
            return None;
        }
        match code & 0xff {
            27 => Some(KeyCommand::Quit),
            c if c == b'q' as i32 || c == b'Q' as i32 => Some(KeyCommand::Quit),
            c if c == b'p' as i32 || c == b'P' as i32 || c == b' ' as i32 => {
                Some(KeyCommand::TogglePause)
            }
            _ => None,
        }
    }
}

/// Where composited frames are shown.
pub trait Surface {
    fn present(&mut self, image: &Mat) -> anyhow::Result<()>;

    /// Current drawable size of the surface, `None` until it is known.
    fn client_size(&self) -> anyhow::Result<Option<Size>>;

    fn set_display_size(&mut self, size: Size) -> anyhow::Result<()>;

    fn poll_key(&mut self) -> anyhow::Result<Option<KeyCommand>>;
}

pub struct HighguiWindow {
    name: String,
}

impl HighguiWindow {
    pub fn new(name: &str) -> anyhow::Result<Self> {
        highgui::named_window(name, highgui::WINDOW_NORMAL)?;
        Ok(Self {
            name: name.to_owned(),
        })
    }
}

impl Surface for HighguiWindow {
    fn present(&mut self, image: &Mat) -> anyhow::Result<()> {
        if !image.empty() {
            highgui::imshow(&self.name, image)?;
        }
        Ok(())
    }

    fn client_size(&self) -> anyhow::Result<Option<Size>> {
        let rect = highgui::get_window_image_rect(&self.name)?;
        if rect.width <= 0 || rect.height <= 0 {
            return Ok(None);
        }
        Ok(Some(rect.size()))
    }

    fn set_display_size(&mut self, size: Size) -> anyhow::Result<()> {
        highgui::resize_window_size(&self.name, size)?;
        Ok(())
    }

    fn poll_key(&mut self) -> anyhow::Result<Option<KeyCommand>> {
        Ok(KeyCommand::from_code(highgui::poll_key()?))
    }
}

impl Drop for HighguiWindow {
    fn drop(&mut self) {
        _ = highgui::destroy_window(&self.name);
    }
}
