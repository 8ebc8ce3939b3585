//! Property tests for path construction and name sanitization.

use proptest::prelude::*;

use tiffbeam::naming::{sanitize, FileNamer};

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

proptest! {
    #[test]
    fn sanitize_emits_only_safe_characters(name in ".*") {
        prop_assert!(sanitize(&name).chars().all(is_safe));
    }

    #[test]
    fn sanitize_preserves_length(name in ".*") {
        prop_assert_eq!(sanitize(&name).chars().count(), name.chars().count());
    }

    #[test]
    fn sanitize_is_idempotent(name in ".*") {
        let once = sanitize(&name);
        prop_assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn sanitize_fixes_already_safe_names(name in "[A-Za-z0-9._-]{0,32}") {
        prop_assert_eq!(sanitize(&name), name);
    }

    #[test]
    fn stack_paths_stay_inside_the_output_directory(
        run in ".*", stream in ".*", field in ".*",
    ) {
        let namer = FileNamer::new("out", "{run}-", &run);
        let path = namer.stack_path(&stream, &field);
        prop_assert!(path.starts_with("out"));
        // Exactly one component below the output directory.
        prop_assert_eq!(path.parent(), Some(std::path::Path::new("out")));
        prop_assert_eq!(path.extension().and_then(|e| e.to_str()), Some("tiff"));
    }

    #[test]
    fn series_paths_embed_the_frame_index(index in 0usize..10_000) {
        let namer = FileNamer::new("out", "{run}-", "r");
        let path = namer.series_path("primary", "det_img", index);
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        prop_assert_eq!(name, format!("r-primary-det_img-{index}.tiff"));
    }

    #[test]
    fn distinct_indices_give_distinct_series_paths(
        a in 0usize..1_000, b in 0usize..1_000,
    ) {
        prop_assume!(a != b);
        let namer = FileNamer::new("out", "{run}-", "r");
        prop_assert_ne!(
            namer.series_path("primary", "det_img", a),
            namer.series_path("primary", "det_img", b)
        );
    }
}
