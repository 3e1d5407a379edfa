use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifies one emergency-department feed.
///
/// The snake_case code is the stable identifier used in configuration,
/// logs and by the persistence layer. Adding a variant requires:
/// - a collector registered for it in `hospitals::register_all`
/// - an entry in `SourceId::ALL`
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    PoCervelloAdulti,
    PoCervelloPediatrico,
    PoVillaSofiaAdulti,
    PoliclinicoPalermo,
    PsSciacca,
    PsRibera,
    PsAgrigento,
    PsCanicatti,
    PsLicata,
    PsSantelia,
    PsIngrassia,
    PsPartinico,
    PsCorleone,
    PsPetralia,
    PsTermini,
    PoCivicoAdulti,
    PoCivicoPediatrico,
    PoRodolico,
    PoSanMarco,
    AoPapardo,
    PoliclinicoMessina,
}

impl SourceId {
    pub const ALL: [SourceId; 21] = [
        SourceId::PoCervelloAdulti,
        SourceId::PoCervelloPediatrico,
        SourceId::PoVillaSofiaAdulti,
        SourceId::PoliclinicoPalermo,
        SourceId::PsSciacca,
        SourceId::PsRibera,
        SourceId::PsAgrigento,
        SourceId::PsCanicatti,
        SourceId::PsLicata,
        SourceId::PsSantelia,
        SourceId::PsIngrassia,
        SourceId::PsPartinico,
        SourceId::PsCorleone,
        SourceId::PsPetralia,
        SourceId::PsTermini,
        SourceId::PoCivicoAdulti,
        SourceId::PoCivicoPediatrico,
        SourceId::PoRodolico,
        SourceId::PoSanMarco,
        SourceId::AoPapardo,
        SourceId::PoliclinicoMessina,
    ];

    pub fn code(self) -> &'static str {
        match self {
            SourceId::PoCervelloAdulti => "po_cervello_adulti",
            SourceId::PoCervelloPediatrico => "po_cervello_pediatrico",
            SourceId::PoVillaSofiaAdulti => "po_villa_sofia_adulti",
            SourceId::PoliclinicoPalermo => "policlinico_palermo",
            SourceId::PsSciacca => "ps_sciacca",
            SourceId::PsRibera => "ps_ribera",
            SourceId::PsAgrigento => "ps_agrigento",
            SourceId::PsCanicatti => "ps_canicatti",
            SourceId::PsLicata => "ps_licata",
            SourceId::PsSantelia => "ps_santelia",
            SourceId::PsIngrassia => "ps_ingrassia",
            SourceId::PsPartinico => "ps_partinico",
            SourceId::PsCorleone => "ps_corleone",
            SourceId::PsPetralia => "ps_petralia",
            SourceId::PsTermini => "ps_termini",
            SourceId::PoCivicoAdulti => "po_civico_adulti",
            SourceId::PoCivicoPediatrico => "po_civico_pediatrico",
            SourceId::PoRodolico => "po_rodolico",
            SourceId::PoSanMarco => "po_san_marco",
            SourceId::AoPapardo => "ao_papardo",
            SourceId::PoliclinicoMessina => "policlinico_messina",
        }
    }

    /// Human-readable name, for log context only.
    pub fn label(self) -> &'static str {
        match self {
            SourceId::PoCervelloAdulti => "P.O. Cervello (adulti)",
            SourceId::PoCervelloPediatrico => "P.O. Cervello (pediatrico)",
            SourceId::PoVillaSofiaAdulti => "P.O. Villa Sofia (adulti)",
            SourceId::PoliclinicoPalermo => "Policlinico Paolo Giaccone",
            SourceId::PsSciacca => "P.O. Giovanni Paolo II, Sciacca",
            SourceId::PsRibera => "P.O. F.lli Parlapiano, Ribera",
            SourceId::PsAgrigento => "P.O. S. Giovanni di Dio, Agrigento",
            SourceId::PsCanicatti => "P.O. Barone Lombardo, Canicatti",
            SourceId::PsLicata => "P.O. San Giacomo d'Altopasso, Licata",
            SourceId::PsSantelia => "P.O. Sant'Elia, Caltanissetta",
            SourceId::PsIngrassia => "P.O. Ingrassia",
            SourceId::PsPartinico => "P.O. Civico di Partinico",
            SourceId::PsCorleone => "P.O. Dei Bianchi, Corleone",
            SourceId::PsPetralia => "P.O. Madonna SS. dell'Alto, Petralia Sottana",
            SourceId::PsTermini => "P.O. Cimino, Termini Imerese",
            SourceId::PoCivicoAdulti => "ARNAS Civico (adulti)",
            SourceId::PoCivicoPediatrico => "ARNAS Di Cristina (pediatrico)",
            SourceId::PoRodolico => "P.O. G. Rodolico",
            SourceId::PoSanMarco => "P.O. San Marco",
            SourceId::AoPapardo => "A.O. Papardo",
            SourceId::PoliclinicoMessina => "Policlinico G. Martino",
        }
    }

    pub fn city(self) -> &'static str {
        match self {
            SourceId::PoCervelloAdulti
            | SourceId::PoCervelloPediatrico
            | SourceId::PoVillaSofiaAdulti
            | SourceId::PoliclinicoPalermo
            | SourceId::PsIngrassia
            | SourceId::PoCivicoAdulti
            | SourceId::PoCivicoPediatrico => "Palermo",
            SourceId::PsSciacca => "Sciacca",
            SourceId::PsRibera => "Ribera",
            SourceId::PsAgrigento => "Agrigento",
            SourceId::PsCanicatti => "Canicatti",
            SourceId::PsLicata => "Licata",
            SourceId::PsPartinico => "Partinico",
            SourceId::PsCorleone => "Corleone",
            SourceId::PsPetralia => "Petralia Sottana",
            SourceId::PsTermini => "Termini Imerese",
            SourceId::PsSantelia => "Caltanissetta",
            SourceId::PoRodolico | SourceId::PoSanMarco => "Catania",
            SourceId::AoPapardo | SourceId::PoliclinicoMessina => "Messina",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source code: {0}")]
pub struct UnknownSourceCode(pub String);

impl FromStr for SourceId {
    type Err = UnknownSourceCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        SourceId::ALL
            .into_iter()
            .find(|id| id.code().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownSourceCode(s.to_string()))
    }
}
