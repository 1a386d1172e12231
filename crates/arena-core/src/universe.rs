/// The monitored DAX-40 universe: XETRA symbol plus company name.
///
/// The company name doubles as the alias used to match feed headlines
/// that do not carry an explicit ticker.
pub const DAX_UNIVERSE: &[(&str, &str)] = &[
    ("ADS.DE", "Adidas"),
    ("AIR.DE", "Airbus"),
    ("ALV.DE", "Allianz"),
    ("BAS.DE", "BASF"),
    ("BAYN.DE", "Bayer"),
    ("BEI.DE", "Beiersdorf"),
    ("BMW.DE", "BMW"),
    ("BNR.DE", "Brenntag"),
    ("CBK.DE", "Commerzbank"),
    ("CON.DE", "Continental"),
    ("1COV.DE", "Covestro"),
    ("DTG.DE", "Daimler Truck"),
    ("DBK.DE", "Deutsche Bank"),
    ("DB1.DE", "Deutsche Boerse"),
    ("DHL.DE", "DHL Group"),
    ("DTE.DE", "Deutsche Telekom"),
    ("EOAN.DE", "E.ON"),
    ("FRE.DE", "Fresenius"),
    ("HNR1.DE", "Hannover Rueck"),
    ("HEI.DE", "Heidelberg Materials"),
    ("HEN3.DE", "Henkel"),
    ("IFX.DE", "Infineon"),
    ("MBG.DE", "Mercedes-Benz"),
    ("MRK.DE", "Merck"),
    ("MTX.DE", "MTU Aero Engines"),
    ("MUV2.DE", "Munich Re"),
    ("P911.DE", "Porsche"),
    ("PAH3.DE", "Porsche Holding"),
    ("QIA.DE", "Qiagen"),
    ("RHM.DE", "Rheinmetall"),
    ("RWE.DE", "RWE"),
    ("SAP.DE", "SAP"),
    ("SRT3.DE", "Sartorius"),
    ("SIE.DE", "Siemens"),
    ("ENR.DE", "Siemens Energy"),
    ("SHL.DE", "Siemens Healthineers"),
    ("SY1.DE", "Symrise"),
    ("VOW3.DE", "Volkswagen"),
    ("VNA.DE", "Vonovia"),
    ("ZAL.DE", "Zalando"),
];

/// Whether `symbol` is a member of the configured universe.
pub fn is_dax_symbol(symbol: &str) -> bool {
    DAX_UNIVERSE.iter().any(|(s, _)| *s == symbol)
}

/// Company name for a universe symbol, if known.
pub fn company_name(symbol: &str) -> Option<&'static str> {
    DAX_UNIVERSE
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universe_has_forty_members() {
        assert_eq!(DAX_UNIVERSE.len(), 40);
    }

    #[test]
    fn all_symbols_carry_xetra_suffix() {
        for (symbol, _) in DAX_UNIVERSE {
            assert!(symbol.ends_with(".DE"), "bad symbol {symbol}");
        }
    }

    #[test]
    fn membership_lookup() {
        assert!(is_dax_symbol("SAP.DE"));
        assert!(!is_dax_symbol("AAPL"));
        assert_eq!(company_name("BMW.DE"), Some("BMW"));
        assert_eq!(company_name("TSLA"), None);
    }
}
