//! ÖNACE industry classification.
//!
//! Documents are tagged with one or more section codes. Code `"0"` marks general
//! material that applies to every industry.

use std::collections::BTreeSet;

use serde::Serialize;

pub const GENERAL_CODE: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OnaceCategory {
    pub code: &'static str,
    pub name_german: &'static str,
    pub name_english: &'static str,
    pub description: &'static str,
}

const fn section(
    code: &'static str,
    name_german: &'static str,
    name_english: &'static str,
) -> OnaceCategory {
    OnaceCategory {
        code,
        name_german,
        name_english,
        description: "",
    }
}

pub static CATEGORIES: [OnaceCategory; 22] = [
    OnaceCategory {
        code: GENERAL_CODE,
        name_german: "Allgemein",
        name_english: "General",
        description: "Applies to all industries",
    },
    section("A", "LAND- UND FORSTWIRTSCHAFT, FISCHEREI (01 - 03)", "AGRICULTURE, FORESTRY, AND FISHING (01 - 03)"),
    section("B", "BERGBAU UND GEWINNUNG VON STEINEN UND ERDEN (05 - 09)", "MINING AND QUARRYING (05 - 09)"),
    section("C", "HERSTELLUNG VON WAREN (10 - 33)", "MANUFACTURING (10 - 33)"),
    section("D", "ENERGIEVERSORGUNG (35)", "ENERGY SUPPLY (35)"),
    section(
        "E",
        "WASSERVERSORGUNG; ABWASSER- UND ABFALLENTSORGUNG UND BESEITIGUNG VON UMWELTVERSCHMUTZUNGEN (36 - 39)",
        "WATER SUPPLY; SEWAGE AND WASTE DISPOSAL AND REMOVAL OF ENVIRONMENTAL POLLUTION (36 - 39)",
    ),
    section("F", "BAU (41 - 43)", "CONSTRUCTION (41 - 43)"),
    section("G", "HANDEL (46 - 47)", "TRADE (46 - 47)"),
    section("H", "VERKEHR UND LAGEREI (49 - 53)", "TRANSPORT AND STORAGE (49 - 53)"),
    section("I", "BEHERBERGUNG UND GASTRONOMIE (55 - 56)", "ACCOMMODATION AND CATERING (55 - 56)"),
    section(
        "J",
        "VERLAGSWESEN, RUNDFUNK SOWIE ERSTELLUNG UND VERBREITUNG VON MEDIENINHALTEN (58 - 60)",
        "PUBLISHING, BROADCASTING AND PRODUCTION AND DISTRIBUTION OF MEDIA CONTENT (58 - 60)",
    ),
    section(
        "K",
        "ERBRINGUNG VON FINANZ- UND VERSICHERUNGSDIENSTLEISTUNGEN (64 - 66)",
        "FINANCIAL AND INSURANCE SERVICES (64 - 66)",
    ),
    section("L", "GRUNDSTÜCKS- UND WOHNUNGSWESEN (68)", "REAL ESTATE ACTIVITIES (68)"),
    section(
        "M",
        "ERBRINGUNG VON FREIBERUFLICHEN, WISSENSCHAFTLICHEN UND TECHNISCHEN DIENSTLEISTUNGEN (69 - 75)",
        "PROFESSIONAL, SCIENTIFIC AND TECHNICAL ACTIVITIES (69 - 75)",
    ),
    section(
        "N",
        "ERBRINGUNG VON SONSTIGEN WIRTSCHAFTLICHEN DIENSTLEISTUNGEN (77 - 82)",
        "ADMINISTRATIVE AND SUPPORT SERVICE ACTIVITIES (77 - 82)",
    ),
    section(
        "O",
        "ÖFFENTLICHE VERWALTUNG, VERTEIDIGUNG; SOZIALVERSICHERUNG (84)",
        "PUBLIC ADMINISTRATION, DEFENCE; COMPULSORY SOCIAL SECURITY (84)",
    ),
    section("P", "ERZIEHUNG UND UNTERRICHT (85)", "EDUCATION (85)"),
    section(
        "Q",
        "GESUNDHEITSWESEN UND SOZIALE DIENSTLEISTUNGEN (86 - 88)",
        "HUMAN HEALTH AND SOCIAL WORK ACTIVITIES (86 - 88)",
    ),
    section("R", "KUNST, UNTERHALTUNG UND ERHOLUNG (90 - 93)", "ARTS, ENTERTAINMENT AND RECREATION (90 - 93)"),
    section("S", "ERBRINGUNG VON SONSTIGEN DIENSTLEISTUNGEN (94 - 96)", "OTHER SERVICE ACTIVITIES (94 - 96)"),
    section(
        "T",
        "PRIVATE HAUSHALTE MIT HAUSHALTSPERSONAL; ERBRINGUNG VON DIENSTLEISTUNGEN FÜR PRIVATE HAUSHALTE ALS ARBEITGEBER (97 - 98)",
        "ACTIVITIES OF HOUSEHOLDS AS EMPLOYERS; UNDIFFERENTIATED GOODS- AND SERVICES-PRODUCING ACTIVITIES OF HOUSEHOLDS FOR OWN USE (97 - 98)",
    ),
    section(
        "U",
        "EXTERRITORIALE ORGANISATIONEN UND KÖRPERSCHAFTEN (99)",
        "ACTIVITIES OF EXTRATERRITORIAL ORGANISATIONS AND BODIES (99)",
    ),
];

pub fn category(code: &str) -> Option<&'static OnaceCategory> {
    CATEGORIES.iter().find(|c| c.code == code)
}

/// Parses strings like `"A, B, C"`. Unknown codes are dropped; an empty result
/// (or empty input) means general.
pub fn parse_codes(raw: &str) -> BTreeSet<String> {
    let mut codes: BTreeSet<String> = raw
        .split(',')
        .map(|code| code.trim().to_ascii_uppercase())
        .filter(|code| category(code).is_some())
        .collect();

    if codes.is_empty() {
        codes.insert(GENERAL_CODE.to_string());
    }
    codes
}

/// General documents are relevant to everyone; otherwise the user's code must match.
pub fn is_relevant(document_codes: &BTreeSet<String>, user_code: &str) -> bool {
    document_codes.is_empty()
        || document_codes.contains(GENERAL_CODE)
        || document_codes.contains(user_code)
}
