//! Parameter templating for API calls.
//!
//! Task params are `key -> template`; the recognised placeholders are
//! `{date}`, `{start_date}`, `{end_date}` and `{stock_code}`. Anything else is
//! passed through untouched.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::dates::format_date;

pub type Params = BTreeMap<String, String>;

pub const PLACEHOLDERS: [&str; 4] = ["date", "start_date", "end_date", "stock_code"];

/// Values substituted into a params template for one API call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    pub date: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub stock_code: Option<String>,
}

impl TemplateVars {
    pub fn for_date(date: NaiveDate) -> Self {
        let s = format_date(date);
        Self {
            date: Some(s.clone()),
            start_date: Some(s.clone()),
            end_date: Some(s),
            stock_code: None,
        }
    }

    pub fn for_range(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            date: Some(format_date(end)),
            start_date: Some(format_date(start)),
            end_date: Some(format_date(end)),
            stock_code: None,
        }
    }

    pub fn with_stock(mut self, code: impl Into<String>) -> Self {
        self.stock_code = Some(code.into());
        self
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "date" => self.date.as_deref(),
            "start_date" => self.start_date.as_deref(),
            "end_date" => self.end_date.as_deref(),
            "stock_code" => self.stock_code.as_deref(),
            _ => None,
        }
    }
}

/// Substitute placeholders in every value of `params`.
///
/// A placeholder without a value in `vars` is left as is.
pub fn render_params(params: &Params, vars: &TemplateVars) -> Params {
    params
        .iter()
        .map(|(k, v)| (k.clone(), render_value(v, vars)))
        .collect()
}

fn render_value(template: &str, vars: &TemplateVars) -> String {
    let mut out = template.to_string();
    for name in PLACEHOLDERS {
        let token = format!("{{{name}}}");
        if !out.contains(&token) {
            continue;
        }
        if let Some(value) = vars.lookup(name) {
            out = out.replace(&token, value);
        }
    }
    out
}
