//! Closed PII/GDPR taxonomy (schema version 1.0.0).
//!
//! Every [`PiiType`] belongs to exactly one [`PiiCategory`]. The wire name is
//! kebab-case; a handful of legacy spellings are accepted on input and
//! normalised to the canonical variant.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Grouping of PII types, mirroring GDPR terminology.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiCategory {
    /// Directly or indirectly identifying data (names, contact details, network ids).
    Identifier,
    /// Art. 9 special categories of personal data.
    SpecialCategory,
    /// Financial and government-issued identifiers.
    FinancialOrGovernment,
    /// Tracking and behavioural identifiers.
    Tracking,
}

macro_rules! pii_types {
    ($( $category:ident => { $( $variant:ident = $name:literal $(| $alias:literal)* ),+ $(,)? } )+) => {
        /// A category of personal data a finding can be classified as.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum PiiType {
            $($(
                #[serde(rename = $name $(, alias = $alias)*)]
                $variant,
            )+)+
        }

        impl PiiType {
            /// Every canonical type, in taxonomy order.
            pub const ALL: &'static [PiiType] = &[$($(PiiType::$variant,)+)+];

            /// Canonical wire name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($(PiiType::$variant => $name,)+)+
                }
            }

            pub fn category(&self) -> PiiCategory {
                match self {
                    $($(PiiType::$variant => PiiCategory::$category,)+)+
                }
            }
        }

        impl FromStr for PiiType {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($($name $(| $alias)* => Ok(PiiType::$variant),)+)+
                    other => Err(DomainError::validation(format!("unknown pii type: {other}"))),
                }
            }
        }
    };
}

pii_types! {
    Identifier => {
        FullName = "full-name" | "full_name",
        FirstName = "first-name" | "first_name",
        LastName = "last-name" | "last_name",
        MiddleName = "middle-name",
        Username = "username",
        Email = "email",
        PhoneNumber = "phone-number",
        Mobile = "mobile",
        IpAddress = "ip-address" | "ip-addresses",
        Address = "address",
        PostalCode = "postal-code",
        Location = "location",
        CookieId = "cookie-id",
        DeviceId = "device-id",
        BrowserFingerprint = "browser-fingerprint",
        LicensePlate = "license-plate",
    }
    SpecialCategory => {
        RacialOrEthnicOrigin = "racial-or-ethnic-origin",
        PoliticalOpinion = "political-opinion",
        ReligiousBelief = "religious-belief",
        PhilosophicalBelief = "philosophical-belief",
        TradeUnionMembership = "trade-union-membership",
        GeneticData = "genetic-data",
        BiometricData = "biometric-data",
        HealthData = "health-data",
        SexLife = "sex-life",
        SexualOrientation = "sexual-orientation",
    }
    FinancialOrGovernment => {
        NationalId = "national-id",
        PassportNumber = "passport-number",
        DrivingLicenseNumber = "driving-license-number",
        Ssn = "ssn",
        VatNumber = "vat-number",
        CreditCard = "credit-card",
        Iban = "iban",
        BankAccount = "bank-account",
    }
    Tracking => {
        DeviceMetadata = "device-metadata",
        LocationCoordinates = "location-coordinates",
        MacAddress = "mac-address",
        Imei = "imei",
        SessionId = "session-id",
        UserAgent = "user-agent",
        ReferrerUrl = "referrer-url",
        UsagePattern = "usage-pattern",
        AnalyticsId = "analytics-id",
    }
}

impl core::fmt::Display for PiiType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip_through_from_str() {
        for ty in PiiType::ALL {
            assert_eq!(ty.as_str().parse::<PiiType>().unwrap(), *ty);
        }
    }

    #[test]
    fn legacy_spellings_normalise() {
        let ty: PiiType = serde_json::from_str("\"full_name\"").unwrap();
        assert_eq!(ty, PiiType::FullName);
        assert_eq!(serde_json::to_string(&ty).unwrap(), "\"full-name\"");

        assert_eq!("ip-addresses".parse::<PiiType>().unwrap(), PiiType::IpAddress);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!("favourite-colour".parse::<PiiType>().is_err());
        assert!(serde_json::from_str::<PiiType>("\"Email\"").is_err());
    }

    #[test]
    fn categories_cover_the_taxonomy() {
        assert_eq!(PiiType::ALL.len(), 43);
        assert_eq!(PiiType::HealthData.category(), PiiCategory::SpecialCategory);
        assert_eq!(PiiType::Iban.category(), PiiCategory::FinancialOrGovernment);
        assert_eq!(PiiType::UserAgent.category(), PiiCategory::Tracking);
        assert_eq!(PiiType::Email.category(), PiiCategory::Identifier);
    }
}
