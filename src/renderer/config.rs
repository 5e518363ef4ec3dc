/// Contains configuration options for the renderer like the application
/// name reported to the driver and the presentation mode preference.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub app_name: String,
    /// When set, presentation always uses FIFO. Otherwise MAILBOX is
    /// preferred with FIFO as the fallback.
    pub vsync: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            app_name: "orrery".to_owned(),
            vsync: false,
        }
    }
}
