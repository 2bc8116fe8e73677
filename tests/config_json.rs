use pic_halo::prelude::*;
use serde_json::json;

#[test]
fn grid_config_from_json_with_defaults() {
    let cfg: GridConfig = serde_json::from_value(json!({
        "dim": 3,
        "cells": [16, 16, 32],
        "cell_size": [0.5, 0.5, 0.25],
        "periodic": [true, true, false],
    }))
    .unwrap();
    assert_eq!(cfg.ghost_width, 2);
    assert_eq!(cfg.stencil_radius, 1);

    let grid = GlobalGrid::try_from(cfg).unwrap();
    assert_eq!(grid.cells(), [16, 16, 32]);
    assert!(grid.is_periodic(1) && !grid.is_periodic(2));
    assert_eq!(grid.length(2), 8.0);
}

#[test]
fn empty_object_is_the_default_grid() {
    let cfg: GridConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(cfg, GridConfig::default());
    assert!(GlobalGrid::try_from(cfg).is_ok());
}

#[test]
fn inconsistent_configs_are_rejected() {
    let bad = [
        json!({ "dim": 4, "cells": [8, 8, 8, 8], "cell_size": [1.0, 1.0, 1.0, 1.0] }),
        json!({ "dim": 2, "cells": [8], "cell_size": [1.0, 1.0] }),
        json!({ "dim": 1, "cells": [8], "cell_size": [-1.0] }),
        json!({ "dim": 1, "cells": [8], "cell_size": [1.0], "ghost_width": 0 }),
        json!({ "dim": 1, "cells": [8], "cell_size": [1.0], "ghost_width": 1, "stencil_radius": 2 }),
        json!({ "dim": 2, "cells": [8, 8], "cell_size": [1.0, 1.0], "periodic": [true] }),
    ];
    for value in bad {
        let cfg: GridConfig = serde_json::from_value(value.clone()).unwrap();
        assert!(
            matches!(GlobalGrid::try_from(cfg), Err(HaloError::Configuration(_))),
            "{value}"
        );
    }
}

#[test]
fn rank_assignment_serde() {
    let a = RankAssignment::balanced(7, 3).unwrap();
    let text = serde_json::to_string(&a).unwrap();
    let back: RankAssignment = serde_json::from_str(&text).unwrap();
    assert_eq!(a, back);
    assert_eq!(back.owner(PatchId::new(2)), Some(0));
    assert_eq!(back.owner(PatchId::new(3)), Some(1));
}

#[test]
fn ordering_names() {
    let o: PatchOrdering = serde_json::from_str("\"Morton\"").unwrap();
    assert_eq!(o, PatchOrdering::Morton);
    assert_eq!(PatchOrdering::default(), PatchOrdering::Lexicographic);
}

#[test]
fn rank_assignment_json_is_validated() {
    for bad in [
        r#"{"owners":[0,0,5],"n_ranks":1}"#,
        r#"{"owners":[0,0],"n_ranks":2}"#,
        r#"{"owners":[],"n_ranks":0}"#,
    ] {
        assert!(serde_json::from_str::<RankAssignment>(bad).is_err(), "{bad}");
    }
}
