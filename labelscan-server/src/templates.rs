use axum::response::Html;
use serde::Serialize;

use crate::errors::WebResult;

lazy_static::lazy_static! {
    pub static ref TEMPLATES: minijinja::Environment<'static> = {
        let mut env = minijinja::Environment::new();
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::Html);
        for (name, template) in &[
            ("base.html.jinja", include_str!("../templates/base.html.jinja")),
            ("login.html.jinja", include_str!("../templates/login.html.jinja")),
            ("register.html.jinja", include_str!("../templates/register.html.jinja")),
            ("onboarding.html.jinja", include_str!("../templates/onboarding.html.jinja")),
            ("dashboard.html.jinja", include_str!("../templates/dashboard.html.jinja")),
            ("scan.html.jinja", include_str!("../templates/scan.html.jinja")),
            ("breakdown.html.jinja", include_str!("../templates/breakdown.html.jinja")),
            ("settings.html.jinja", include_str!("../templates/settings.html.jinja")),
        ] {
            env.add_template(name, template)
                .expect("Failed to register template");
        }
        env
    };
}

/// Render a page by template name.
pub fn render<S: Serialize>(name: &str, ctx: S) -> WebResult<Html<String>> {
    Ok(Html(TEMPLATES.get_template(name)?.render(ctx)?))
}
