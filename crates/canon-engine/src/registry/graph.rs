//! Rule dependency graph: unknown-target and cycle detection, evaluation depth

use std::collections::HashMap;

use canon_types::Rule;

use crate::error::SchemaError;

enum Mark {
    Visiting,
    Done(usize),
}

/// Depth of every rule in the dependency DAG (0 = no dependencies). Rules at the same
/// depth can be evaluated concurrently once all shallower depths are complete.
///
/// Fails on a dependency naming an unknown rule or on any cycle, reporting the cycle path.
pub(crate) fn dependency_depths(rules: &[Rule]) -> Result<HashMap<String, usize>, SchemaError> {
    let by_id: HashMap<&str, &Rule> = rules.iter().map(|r| (r.id.as_str(), r)).collect();

    for rule in rules {
        for dep in &rule.requires {
            if !by_id.contains_key(dep.rule.as_str()) {
                return Err(SchemaError::UnknownDependency {
                    rule: rule.id.clone(),
                    dependency: dep.rule.clone(),
                });
            }
        }
    }

    let mut ids: Vec<&str> = by_id.keys().copied().collect();
    ids.sort_unstable();

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();
    for id in ids {
        visit(id, &by_id, &mut marks, &mut stack)?;
    }

    Ok(marks
        .into_iter()
        .filter_map(|(id, mark)| match mark {
            Mark::Done(depth) => Some((id.to_string(), depth)),
            Mark::Visiting => None,
        })
        .collect())
}

fn visit<'a>(
    id: &'a str,
    by_id: &HashMap<&'a str, &'a Rule>,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
) -> Result<usize, SchemaError> {
    match marks.get(id) {
        Some(Mark::Done(depth)) => return Ok(*depth),
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|s| *s == id).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(id.to_string());
            return Err(SchemaError::DependencyCycle(cycle));
        }
        None => {}
    }

    let Some(&rule) = by_id.get(id) else {
        return Ok(0);
    };

    marks.insert(id, Mark::Visiting);
    stack.push(id);

    let mut depth = 0;
    for dep in &rule.requires {
        let dep_depth = visit(dep.rule.as_str(), by_id, marks, stack)?;
        depth = depth.max(dep_depth + 1);
    }

    stack.pop();
    marks.insert(id, Mark::Done(depth));
    Ok(depth)
}
