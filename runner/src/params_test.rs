use crate::{
    job::Arguments,
    params::{basename, FileReference, ParameterError, ParameterMap},
};

const DEVICE_PARAMETERS: &str = "\
** SimSS Device Parameters **
version: 5.18
** General **
L = 540E-9                    * m, device length/thickness
Gen_profile = calc            * name of file generation profile (or 'none' or 'calc')
l1.nk_file = ../Data/nk_PM6.txt * layer optical constants
spectrum = ../Data/AM15G.txt  * name of file that contains the spectrum
JV_file = JV.dat              * name of the file with the JV curve
Gfrac = 1                     * fraction of generation
";

#[test]
pub fn parse_parameter_file() {
    let text = DEVICE_PARAMETERS.replace("version: 5.18\n", "");
    let map = ParameterMap::parse(&text).unwrap();

    assert_eq!(map.keys().count(), 6);
    assert_eq!(map.get("L"), Some("540E-9"));
    assert_eq!(map.get("l1.nk_file"), Some("../Data/nk_PM6.txt"));
    assert_eq!(map.get("Gfrac"), Some("1"));
    assert_eq!(
        map.keys().collect::<Vec<_>>(),
        ["L", "Gen_profile", "l1.nk_file", "spectrum", "JV_file", "Gfrac"]
    );
}

#[test]
pub fn reject_malformed_lines() {
    assert!(matches!(
        ParameterMap::parse(DEVICE_PARAMETERS),
        Err(ParameterError::Malformed { line: 2, .. })
    ));
    assert!(matches!(
        ParameterMap::parse("a = 1\na = 2\n"),
        Err(ParameterError::DuplicateKey(key)) if key == "a"
    ));
}

#[test]
pub fn classify_file_references() {
    assert_eq!(FileReference::of("l1.nk_file"), Some(FileReference::OpticalTable));
    assert_eq!(FileReference::of("nk_substrate"), Some(FileReference::OpticalTable));
    assert_eq!(FileReference::of("l2.nkLayer"), Some(FileReference::OpticalTable));
    assert_eq!(FileReference::of("spectrum"), Some(FileReference::Spectrum));
    assert_eq!(FileReference::of("tVG_file"), Some(FileReference::VoltageTable));
    assert_eq!(FileReference::of("tVGFile"), Some(FileReference::VoltageTable));
    assert_eq!(FileReference::of("JV_file"), Some(FileReference::Other));
    assert_eq!(FileReference::of("scParsFile"), Some(FileReference::Other));
    assert_eq!(FileReference::of("Gen_profile"), Some(FileReference::GenerationProfile));
    assert_eq!(FileReference::of("genProfile"), Some(FileReference::GenerationProfile));
    assert_eq!(FileReference::of("Gfrac"), None);
    assert_eq!(FileReference::of("nkappa"), None);

    assert!(FileReference::Spectrum.is_input(true));
    assert!(!FileReference::Spectrum.is_input(false));
    assert!(FileReference::VoltageTable.is_input(false));
    assert!(!FileReference::Other.is_input(true));
    assert!(FileReference::GenerationProfile.is_input(false));

    assert!(FileReference::GenerationProfile.names_file("gen_profile.txt"));
    assert!(!FileReference::GenerationProfile.names_file("calc"));
    assert!(!FileReference::GenerationProfile.names_file("None"));
    assert!(FileReference::Other.names_file("traps.txt"));
    assert!(!FileReference::Other.names_file("none"));
}

#[test]
pub fn overrides_take_precedence() {
    let file: ParameterMap = [("Gen_profile", "none"), ("Gfrac", "1")].into_iter().collect();
    let overrides: ParameterMap = [("Gen_profile", "calc")].into_iter().collect();

    assert!(!file.generation_computed(&ParameterMap::new()));
    assert!(file.generation_computed(&overrides));
    assert_eq!(file.resolve("Gfrac", &overrides), Some("1"));
    assert_eq!(file.resolve("Gen_profile", &overrides), Some("calc"));
}

#[test]
pub fn rewrite_keeps_comments() {
    let updates: ParameterMap = [("Gfrac", "0.5"), ("spectrum", "AM15G.txt")]
        .into_iter()
        .collect();
    let rewritten = updates.apply_to(DEVICE_PARAMETERS);
    let text = rewritten.replace("version: 5.18\n", "");
    let map = ParameterMap::parse(&text).unwrap();

    assert_eq!(map.get("Gfrac"), Some("0.5"));
    assert_eq!(map.get("spectrum"), Some("AM15G.txt"));
    assert_eq!(map.get("L"), Some("540E-9"));
    assert!(rewritten.contains("* fraction of generation\n"));
    assert!(rewritten.starts_with("** SimSS Device Parameters **\n"));
    assert_eq!(rewritten.lines().count(), DEVICE_PARAMETERS.lines().count());
}

#[test]
pub fn basenames() {
    assert_eq!(basename("../Data/AM15G.txt"), "AM15G.txt");
    assert_eq!(basename("JV.dat"), "JV.dat");
}

#[test]
pub fn parse_arguments() {
    let arguments = Arguments::parse("simss_device_parameters.txt -Gfrac 0.5 -Vmin -0.2").unwrap();

    assert_eq!(
        arguments.parameter_file.as_deref(),
        Some("simss_device_parameters.txt")
    );
    assert_eq!(arguments.overrides.get("Gfrac"), Some("0.5"));
    assert_eq!(arguments.overrides.get("Vmin"), Some("-0.2"));
    assert_eq!(arguments.overrides.to_arguments(), "-Gfrac 0.5 -Vmin -0.2");

    let defaults = Arguments::parse("  -JV_file JV_1.dat  ").unwrap();
    assert!(defaults.parameter_file.is_none());
    assert!(defaults
        .parameter_path(std::path::Path::new("SimSS"))
        .ends_with("device_parameters.txt"));
}

#[test]
pub fn reject_broken_arguments() {
    assert!(matches!(
        Arguments::parse("-Gfrac"),
        Err(ParameterError::MissingValue(key)) if key == "Gfrac"
    ));
    assert!(matches!(
        Arguments::parse("a.txt b.txt"),
        Err(ParameterError::UnexpectedArgument(arg)) if arg == "b.txt"
    ));
    assert!(matches!(
        Arguments::parse("-Gfrac 1 stray"),
        Err(ParameterError::UnexpectedArgument(arg)) if arg == "stray"
    ));
}
