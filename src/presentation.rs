//! Per-request rendering: locale and unit selection, and the template
//! registry bound to them.
//!
//! The registry built at startup holds every template plus the helpers that
//! do not depend on the viewer. Each request clones it and rebinds the
//! locale- and unit-dependent helpers, so concurrent requests never observe
//! each other's settings.

use anyhow::{Context as _, Result};
use chrono::NaiveDateTime;
use handlebars::{
    html_escape, Context, Handlebars, Helper, HelperResult, JsonRender, Output, RenderContext,
    RenderError,
};
use serde_json::{json, Value};
use std::time::Duration;

use crate::i18n::{Language, Localizer, Translator};
use crate::manual::HTML_DATE_FORMAT;
use crate::models::{User, WorkoutType};
use crate::units::{self, UnitSystem};

const TEMPLATES: &[(&str, &str)] = &[
    ("user_signin", include_str!("../views/user_signin.hbs")),
    ("user_profile", include_str!("../views/user_profile.hbs")),
    ("workouts", include_str!("../views/workouts.hbs")),
    ("workout_show", include_str!("../views/workout_show.hbs")),
    ("workout_form", include_str!("../views/workout_form.hbs")),
    ("equipment", include_str!("../views/equipment.hbs")),
    ("dashboard", include_str!("../views/dashboard.hbs")),
    ("statistics", include_str!("../views/statistics.hbs")),
    ("admin", include_str!("../views/admin.hbs")),
    ("admin_user_form", include_str!("../views/admin_user_form.hbs")),
];

const PARTIALS: &[(&str, &str)] = &[
    ("header", include_str!("../views/partials/header.hbs")),
    ("footer", include_str!("../views/partials/footer.hbs")),
    ("flash", include_str!("../views/partials/flash.hbs")),
];

fn f64_param(h: &Helper, idx: usize) -> f64 {
    h.param(idx)
        .and_then(|p| p.value().as_f64())
        .unwrap_or_default()
}

fn bool_param(h: &Helper, idx: usize) -> bool {
    h.param(idx)
        .map(|p| p.value().as_bool().unwrap_or(!p.value().is_null()))
        .unwrap_or_default()
}

fn str_param(h: &Helper, idx: usize) -> String {
    h.param(idx).map(|p| p.value().render()).unwrap_or_default()
}

fn duration_param(h: &Helper, idx: usize) -> Duration {
    Duration::try_from_secs_f64(f64_param(h, idx)).unwrap_or_default()
}

fn numeric_duration_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let secs = units::numeric_duration(duration_param(h, 0));
    out.write(&format!("{}", secs.trunc()))?;
    Ok(())
}

fn human_duration_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&units::human_duration(duration_param(h, 0)))?;
    Ok(())
}

fn country_flag_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&units::country_code_to_flag(&str_param(h, 0)))?;
    Ok(())
}

fn bool_to_html_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(units::bool_to_html(bool_param(h, 0)))?;
    Ok(())
}

fn bool_to_checkbox_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(units::bool_to_checkbox(bool_param(h, 0)))?;
    Ok(())
}

fn icon_for_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(units::icon_for(&str_param(h, 0)))?;
    Ok(())
}

/// `{{LocalDate date full}}` where `date` is in the form input format.
fn local_date_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let raw = str_param(h, 0);
    let Ok(date) = NaiveDateTime::parse_from_str(&raw, HTML_DATE_FORMAT) else {
        out.write(&html_escape(&raw))?;
        return Ok(());
    };

    let format = if bool_param(h, 1) {
        "%A %-d %B %Y, %H:%M"
    } else {
        "%Y-%m-%d %H:%M"
    };
    out.write(&date.format(format).to_string())?;
    Ok(())
}

fn to_kilometer_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&units::to_kilometer(f64_param(h, 0)).to_string())?;
    Ok(())
}

/// Registers the helpers whose output depends on the viewer's locale and
/// unit system, replacing any earlier binding.
fn register_request_helpers(hb: &mut Handlebars<'static>, localizer: &Localizer, unit_system: UnitSystem) {
    let l = localizer.clone();
    hb.register_helper(
        "i18n",
        Box::new(
            move |h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output| -> HelperResult {
                let key = str_param(h, 0);
                let args: Vec<String> = h.params().iter().skip(1).map(|p| p.value().render()).collect();
                let args: Vec<&dyn std::fmt::Display> =
                    args.iter().map(|a| a as &dyn std::fmt::Display).collect();
                out.write(&html_escape(&l.getf(&key, &args)))?;
                Ok(())
            },
        ),
    );

    let code = localizer.language().code();
    hb.register_helper(
        "language",
        Box::new(
            move |_: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output| -> HelperResult {
                out.write(code)?;
                Ok(())
            },
        ),
    );

    hb.register_helper(
        "HumanDistance",
        Box::new(
            move |h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output| -> HelperResult {
                out.write(&units::human_distance(f64_param(h, 0), unit_system))?;
                Ok(())
            },
        ),
    );
    hb.register_helper(
        "HumanSpeed",
        Box::new(
            move |h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output| -> HelperResult {
                out.write(&units::human_speed(f64_param(h, 0), unit_system))?;
                Ok(())
            },
        ),
    );
    hb.register_helper(
        "HumanTempo",
        Box::new(
            move |h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output| -> HelperResult {
                out.write(&units::human_tempo(f64_param(h, 0), unit_system))?;
                Ok(())
            },
        ),
    );
    hb.register_helper(
        "HumanWeight",
        Box::new(
            move |h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output| -> HelperResult {
                out.write(&units::human_weight(f64_param(h, 0), unit_system))?;
                Ok(())
            },
        ),
    );
    hb.register_helper(
        "LocalUnit",
        Box::new(
            move |h: &Helper, _: &Handlebars, _: &Context, _: &mut RenderContext, out: &mut dyn Output| -> HelperResult {
                out.write(units::local_unit(unit_system, &str_param(h, 0)))?;
                Ok(())
            },
        ),
    );
}

/// Builds the startup registry: all templates, the viewer-independent
/// helpers, and English/metric defaults for the rest.
pub fn base_registry(translator: &Translator) -> Result<Handlebars<'static>> {
    let mut hb = Handlebars::new();

    for (name, source) in PARTIALS {
        hb.register_partial(name, *source)
            .with_context(|| format!("registering partial {}", name))?;
    }
    for (name, source) in TEMPLATES {
        hb.register_template_string(name, *source)
            .with_context(|| format!("registering template {}", name))?;
    }

    hb.register_helper("NumericDuration", Box::new(numeric_duration_helper));
    hb.register_helper("HumanDuration", Box::new(human_duration_helper));
    hb.register_helper("CountryCodeToFlag", Box::new(country_flag_helper));
    hb.register_helper("BoolToHTML", Box::new(bool_to_html_helper));
    hb.register_helper("BoolToCheckbox", Box::new(bool_to_checkbox_helper));
    hb.register_helper("IconFor", Box::new(icon_for_helper));
    hb.register_helper("LocalDate", Box::new(local_date_helper));
    hb.register_helper("ToKilometer", Box::new(to_kilometer_helper));

    register_request_helpers(&mut hb, &translator.for_language(Language::English), UnitSystem::Metric);

    Ok(hb)
}

/// Everything about the viewer that influences a rendered page.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub localizer: Localizer,
    pub units: UnitSystem,
    pub user: Option<User>,
}

impl RequestContext {
    /// Locale precedence: `lang` query parameter, the session's language,
    /// the profile's language, then the `Accept-Language` header. Units come
    /// from the profile, or from the header when the profile defers to the
    /// browser.
    pub fn resolve(
        translator: &Translator,
        user: Option<&User>,
        query_lang: Option<&str>,
        session_lang: Option<&str>,
        accept_language: Option<&str>,
    ) -> Self {
        let profile_lang = user.map(|u| u.profile.language.as_str());
        let localizer =
            translator.localizer(&[query_lang, session_lang, profile_lang, accept_language]);

        let units = user
            .map(User::units)
            .unwrap_or_default()
            .resolve(accept_language);

        RequestContext {
            localizer,
            units,
            user: user.cloned(),
        }
    }

    pub fn t(&self, key: &str) -> String {
        self.localizer.get(key)
    }

    /// A copy of `base` with this request's locale and units bound.
    pub fn view(&self, base: &Handlebars<'static>) -> Handlebars<'static> {
        let mut hb = base.clone();
        register_request_helpers(&mut hb, &self.localizer, self.units);
        hb
    }

    /// Fields every page template expects, merged under `page`.
    pub fn page_data(&self, page: Value) -> Value {
        let mut data = json!({
            "language": self.localizer.language().code(),
            "languages": Language::all()
                .iter()
                .map(|l| json!({ "code": l.code(), "name": l.native_name() }))
                .collect::<Vec<_>>(),
            "units": self.units.as_str(),
            "workout_types": WorkoutType::all().iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            "user": self.user,
        });

        if let (Value::Object(base), Value::Object(extra)) = (&mut data, page) {
            base.extend(extra);
        }
        data
    }

    pub fn render(
        &self,
        base: &Handlebars<'static>,
        template: &str,
        page: Value,
    ) -> Result<String, RenderError> {
        self.view(base).render(template, &self.page_data(page))
    }
}
