//! Supported SaaS providers and their capability classes.

use serde::{Deserialize, Serialize};

/// External provider an integration connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Microsoft,
    Linear,
    Todoist,
    ClickUp,
    Gusto,
    BambooHr,
}

crate::impl_domain_status_conversions!(Provider {
    Google => "google",
    Microsoft => "microsoft",
    Linear => "linear",
    Todoist => "todoist",
    ClickUp => "clickup",
    Gusto => "gusto",
    BambooHr => "bamboohr",
});

/// How a provider's access tokens behave over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshClass {
    /// Short-lived access token plus a refresh token that may rotate.
    Refreshable,
    /// Long-lived token that cannot be refreshed at all.
    Permanent,
    /// Short-lived token whose refresh token is only issued on first consent.
    ExpiringRequiresRefreshToken,
}

/// Kind of remote data a provider mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    CalendarEvents,
    Tasks,
    Employees,
}

impl Provider {
    pub const ALL: [Self; 7] = [
        Self::Google,
        Self::Microsoft,
        Self::Linear,
        Self::Todoist,
        Self::ClickUp,
        Self::Gusto,
        Self::BambooHr,
    ];

    pub const fn refresh_class(self) -> RefreshClass {
        match self {
            Self::Microsoft | Self::Gusto => RefreshClass::Refreshable,
            Self::Linear | Self::Todoist | Self::ClickUp => RefreshClass::Permanent,
            Self::Google | Self::BambooHr => RefreshClass::ExpiringRequiresRefreshToken,
        }
    }

    pub const fn data_kind(self) -> DataKind {
        match self {
            Self::Google | Self::Microsoft => DataKind::CalendarEvents,
            Self::Linear | Self::Todoist | Self::ClickUp => DataKind::Tasks,
            Self::Gusto | Self::BambooHr => DataKind::Employees,
        }
    }

    /// Upper-case token used in `ORGSYNC_<PROVIDER>_*` environment variables.
    pub const fn env_key(self) -> &'static str {
        match self {
            Self::Google => "GOOGLE",
            Self::Microsoft => "MICROSOFT",
            Self::Linear => "LINEAR",
            Self::Todoist => "TODOIST",
            Self::ClickUp => "CLICKUP",
            Self::Gusto => "GUSTO",
            Self::BambooHr => "BAMBOOHR",
        }
    }
}
