use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InitiationId(pub String);

impl InitiationId {
    pub fn generate() -> Self {
        Self(format!("INI-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiationStatus {
    Draft,
    Submitted,
    ManagerApproved,
    ProcurementApproved,
    Approved,
    Rejected,
    ReturnedForRevision,
    SupplierEmailed,
}

impl InitiationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::ManagerApproved => "manager_approved",
            Self::ProcurementApproved => "procurement_approved",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ReturnedForRevision => "returned_for_revision",
            Self::SupplierEmailed => "supplier_emailed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "manager_approved" => Some(Self::ManagerApproved),
            "procurement_approved" => Some(Self::ProcurementApproved),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "returned_for_revision" => Some(Self::ReturnedForRevision),
            "supplier_emailed" => Some(Self::SupplierEmailed),
            _ => None,
        }
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Rejected | Self::ReturnedForRevision)
    }

    /// States in which at least one slot may still be decided.
    pub fn accepts_decisions(&self) -> bool {
        matches!(self, Self::Submitted | Self::ManagerApproved | Self::ProcurementApproved)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseType {
    Regular,
    OnceOff,
    SharedIp,
}

impl PurchaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::OnceOff => "once_off",
            Self::SharedIp => "shared_ip",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "regular" => Some(Self::Regular),
            "once_off" => Some(Self::OnceOff),
            "shared_ip" => Some(Self::SharedIp),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierLocation {
    Local,
    Foreign,
}

impl SupplierLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Foreign => "foreign",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Self::Local),
            "foreign" => Some(Self::Foreign),
            _ => None,
        }
    }
}

/// Requester-supplied fields describing the supplier and the intended purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierDetails {
    pub supplier_name: String,
    pub contact_person: String,
    pub contact_email: String,
    pub business_units: Vec<String>,
    pub product_category: String,
    pub purchase_type: PurchaseType,
    pub annual_purchase_value: Option<Decimal>,
    pub currency: String,
    pub payment_terms: String,
    pub supplier_location: SupplierLocation,
}

impl SupplierDetails {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.supplier_name.trim().is_empty() {
            return Err(DomainError::Validation("supplier name is required".to_owned()));
        }
        if self.contact_person.trim().is_empty() {
            return Err(DomainError::Validation("supplier contact person is required".to_owned()));
        }
        if !is_plausible_email(&self.contact_email) {
            return Err(DomainError::Validation(format!(
                "supplier contact email `{}` is malformed",
                self.contact_email
            )));
        }
        if self.business_units.iter().all(|unit| unit.trim().is_empty()) {
            return Err(DomainError::Validation(
                "at least one business unit is required".to_owned(),
            ));
        }
        if self.product_category.trim().is_empty() {
            return Err(DomainError::Validation("product/service category is required".to_owned()));
        }
        match self.annual_purchase_value {
            Some(value) if value.is_sign_negative() => {
                return Err(DomainError::Validation(
                    "annual purchase value cannot be negative".to_owned(),
                ));
            }
            Some(value) if self.purchase_type == PurchaseType::Regular && value.is_zero() => {
                return Err(DomainError::Validation(
                    "regular purchases require an annual purchase value above zero".to_owned(),
                ));
            }
            None if self.purchase_type == PurchaseType::Regular => {
                return Err(DomainError::Validation(
                    "regular purchases require an annual purchase value".to_owned(),
                ));
            }
            _ => {}
        }
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
            return Err(DomainError::Validation(format!(
                "currency `{}` must be a three-letter ISO code",
                self.currency
            )));
        }
        Ok(())
    }
}

pub fn is_plausible_email(value: &str) -> bool {
    let value = value.trim();
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.contains(char::is_whitespace)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiation {
    pub id: InitiationId,
    pub requester_id: UserId,
    pub details: SupplierDetails,
    pub status: InitiationStatus,
    /// Bumped on every persisted status change; writers compare-and-set on it.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Initiation {
    pub fn new_draft(
        requester_id: UserId,
        details: SupplierDetails,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        details.validate()?;
        Ok(Self {
            id: InitiationId::generate(),
            requester_id,
            details,
            status: InitiationStatus::Draft,
            version: 0,
            created_at: now,
            updated_at: now,
            submitted_at: None,
        })
    }

    pub fn ensure_editable_by(&self, user_id: &UserId) -> Result<(), DomainError> {
        if &self.requester_id != user_id {
            return Err(DomainError::Unauthorized(format!(
                "only the requester may edit initiation `{}`",
                self.id.0
            )));
        }
        if !self.status.is_editable() {
            return Err(DomainError::InvalidState(format!(
                "initiation `{}` is {} and can no longer be edited",
                self.id.0,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}
