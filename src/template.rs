//! Template rendering for generated project files.

use minijinja::Environment;
use serde::Serialize;

const APP_TEMPLATE: &str = include_str!("templates/app.py.jinja");

/// Context data passed to the app stub template
#[derive(Debug, Serialize)]
pub struct AppContext<'a> {
    /// Chalice application name
    pub app_name: &'a str,
}

/// Render the `app.py` entry point for a new project
pub fn render_app(ctx: &AppContext<'_>) -> anyhow::Result<String> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_template("app.py", APP_TEMPLATE)?;

    let template = env.get_template("app.py")?;
    let rendered = template.render(ctx)?;

    Ok(rendered)
}
