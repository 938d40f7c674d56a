use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::SptError;

pub const ECMWF_MODEL: &str = "erfp";
pub const WRF_HYDRO_MODEL: &str = "wrfp";

pub const DEFAULT_DATE_FORMAT: &str = "%Y%m%d";
pub const ENSEMBLE_DATE_FORMAT: &str = "%Y%m%d.%H";
pub const WRF_HYDRO_DATE_FORMAT: &str = "%Y%m%dT%H%MZ";

const ENSEMBLE_CYCLE_LEN: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityStrategy {
    Generic {
        model_name: String,
        date_format: String,
    },
    Ensemble { model_name: String },
    RapidInput {
        model_name: String,
        instance_id: String,
    },
}

impl IdentityStrategy {
    pub fn generic(model_name: &str) -> Self {
        IdentityStrategy::Generic {
            model_name: model_name.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    pub fn ecmwf() -> Self {
        IdentityStrategy::Ensemble {
            model_name: ECMWF_MODEL.to_string(),
        }
    }

    pub fn wrf_hydro() -> Self {
        IdentityStrategy::Generic {
            model_name: WRF_HYDRO_MODEL.to_string(),
            date_format: WRF_HYDRO_DATE_FORMAT.to_string(),
        }
    }

    pub fn rapid_input(model_name: &str, instance_id: &str) -> Self {
        IdentityStrategy::RapidInput {
            model_name: model_name.to_string(),
            instance_id: instance_id.to_string(),
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            IdentityStrategy::Generic { model_name, .. }
            | IdentityStrategy::Ensemble { model_name }
            | IdentityStrategy::RapidInput { model_name, .. } => model_name,
        }
    }

    pub fn date_format(&self) -> &str {
        match self {
            IdentityStrategy::Generic { date_format, .. } => date_format,
            IdentityStrategy::Ensemble { .. } => ENSEMBLE_DATE_FORMAT,
            IdentityStrategy::RapidInput { .. } => DEFAULT_DATE_FORMAT,
        }
    }

    pub fn context(
        &self,
        watershed: &str,
        subbasin: &str,
        date_string: &str,
    ) -> Result<RunContext, SptError> {
        let date_string = match self {
            IdentityStrategy::Ensemble { .. } => truncate_cycle(date_string),
            _ => date_string.trim(),
        };
        let forecast_date = parse_forecast_date(date_string, self.date_format())?;
        Ok(RunContext {
            watershed: watershed.trim().to_lowercase(),
            subbasin: subbasin.trim().to_lowercase(),
            date_string: date_string.to_string(),
            forecast_date,
        })
    }

    pub fn undated_context(
        &self,
        watershed: &str,
        subbasin: &str,
        now: NaiveDateTime,
    ) -> RunContext {
        RunContext {
            watershed: watershed.trim().to_lowercase(),
            subbasin: subbasin.trim().to_lowercase(),
            date_string: now.format(self.date_format()).to_string(),
            forecast_date: now,
        }
    }

    pub fn dataset_name(&self, ctx: &RunContext) -> String {
        match self {
            IdentityStrategy::Generic { model_name, .. } => format!(
                "{model_name}-{}-{}-{}",
                ctx.watershed,
                ctx.subbasin,
                ctx.forecast_date.format("%Y%m%d")
            ),
            IdentityStrategy::Ensemble { model_name } => format!(
                "{model_name}-{}-{}-{}",
                ctx.watershed,
                ctx.subbasin,
                ctx.forecast_date.format("%Y%m%dt%H")
            ),
            IdentityStrategy::RapidInput {
                model_name,
                instance_id,
            } => format!("{model_name}-rapid-input-{instance_id}"),
        }
    }

    pub fn resource_name(&self, ctx: &RunContext, variant: Option<&ResourceVariant>) -> String {
        let base = match self {
            IdentityStrategy::Generic { model_name, .. }
            | IdentityStrategy::Ensemble { model_name } => format!(
                "{model_name}-{}-{}-{}",
                ctx.watershed, ctx.subbasin, ctx.date_string
            ),
            IdentityStrategy::RapidInput { model_name, .. } => {
                format!("{model_name}-{}-{}-rapid-input", ctx.watershed, ctx.subbasin)
            }
        };
        match variant {
            Some(variant) => format!("{base}-{variant}"),
            None => base,
        }
    }

    pub fn dataset_prefix(&self, basin: Option<(&str, &str)>) -> String {
        match basin {
            Some((watershed, subbasin)) => format!(
                "{}-{}-{}-",
                self.model_name(),
                watershed.trim().to_lowercase(),
                subbasin.trim().to_lowercase()
            ),
            None => format!("{}-", self.model_name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    watershed: String,
    subbasin: String,
    date_string: String,
    forecast_date: NaiveDateTime,
}

impl RunContext {
    pub fn watershed(&self) -> &str {
        &self.watershed
    }

    pub fn subbasin(&self) -> &str {
        &self.subbasin
    }

    pub fn date_string(&self) -> &str {
        &self.date_string
    }

    pub fn forecast_date(&self) -> NaiveDateTime {
        self.forecast_date
    }

    pub fn basin_folder(&self) -> String {
        format!("{}-{}", self.watershed, self.subbasin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceVariant {
    EnsembleMember(String),
    WarningPoints(String),
}

impl fmt::Display for ResourceVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceVariant::EnsembleMember(member) => write!(f, "{member}"),
            ResourceVariant::WarningPoints(period) => write!(f, "warning_points_{period}"),
        }
    }
}

pub fn is_warning_points_name(resource_name: &str) -> bool {
    resource_name.contains("warning_points")
}

pub fn return_period_from_name(resource_name: &str) -> Option<&str> {
    if !is_warning_points_name(resource_name) {
        return None;
    }
    resource_name
        .rsplit('-')
        .next()
        .and_then(|suffix| suffix.rsplit('_').next())
        .filter(|period| !period.is_empty())
}

pub fn truncate_cycle(date_string: &str) -> &str {
    let trimmed = date_string.trim();
    match trimmed.char_indices().nth(ENSEMBLE_CYCLE_LEN) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}

pub fn parse_forecast_date(value: &str, format: &str) -> Result<NaiveDateTime, SptError> {
    if format == ENSEMBLE_DATE_FORMAT {
        return parse_cycle_token(value);
    }
    NaiveDateTime::parse_from_str(value, format)
        .or_else(|_| {
            NaiveDate::parse_from_str(value, format).map(|date| date.and_time(NaiveTime::MIN))
        })
        .map_err(|_| SptError::InvalidDate {
            value: value.to_string(),
            format: format.to_string(),
        })
}

pub fn parse_cycle_token(value: &str) -> Result<NaiveDateTime, SptError> {
    let invalid = || SptError::InvalidDate {
        value: value.to_string(),
        format: ENSEMBLE_DATE_FORMAT.to_string(),
    };
    let (day, hour) = match value.split_once('.') {
        Some((day, hour)) => (day, hour),
        None => (value, "0"),
    };
    let date = NaiveDate::parse_from_str(day, DEFAULT_DATE_FORMAT).map_err(|_| invalid())?;
    let hour = hour.parse::<u32>().map_err(|_| invalid())?;
    date.and_hms_opt(hour, 0, 0).ok_or_else(invalid)
}

pub fn parse_dataset_date(dataset_name: &str) -> Result<NaiveDateTime, SptError> {
    let token = dataset_name.rsplit('-').next().unwrap_or(dataset_name);
    parse_cycle_token(&token.replace('t', "."))
}

pub fn watershed_subbasin_from_folder(folder_name: &str) -> Result<(String, String), SptError> {
    let mut parts = folder_name.split('-');
    let watershed = parts.next().filter(|part| !part.is_empty());
    let subbasin = parts.next().filter(|part| !part.is_empty());
    match (watershed, subbasin) {
        (Some(watershed), Some(subbasin)) => Ok((watershed.to_lowercase(), subbasin.to_lowercase())),
        _ => Err(SptError::InvalidFolderName(folder_name.to_string())),
    }
}
