use url::Url;

/// A required piece of information and the headings that may carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnGroup {
    pub field: Field,
    /// Accepted headings. When a file has several, the leftmost one is read.
    pub columns: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    CourseId,
    DestinationCategoryId,
}

pub const COLUMN_GROUPS: [ColumnGroup; 2] = [
    ColumnGroup {
        field: Field::CourseId,
        columns: &["courseid", "url"],
    },
    ColumnGroup {
        field: Field::DestinationCategoryId,
        columns: &["categoryid"],
    },
];

/// Where each required field sits in a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMap {
    course: Located,
    category: Located,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Located {
    column: &'static str,
    index: usize,
}

impl HeaderMap {
    /// Matches the header row case-insensitively against [`COLUMN_GROUPS`].
    ///
    /// Returns one message per group with no matching heading, in group
    /// order, when any group is missing.
    pub fn from_headers<'a, I>(headers: I) -> Result<Self, Vec<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let headers: Vec<String> = headers
            .into_iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let mut errors = Vec::new();
        let mut found = Vec::with_capacity(COLUMN_GROUPS.len());
        for group in COLUMN_GROUPS {
            let located = headers.iter().enumerate().find_map(|(index, header)| {
                group
                    .columns
                    .iter()
                    .find(|&&column| column == header.as_str())
                    .map(|&column| Located { column, index })
            });
            match located {
                Some(located) => found.push(located),
                None => errors.push(format!(
                    "CSV file must include one of {} as column headings",
                    group.columns.join(", ")
                )),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        let mut found = found.into_iter();
        match (found.next(), found.next()) {
            (Some(course), Some(category)) => Ok(Self { course, category }),
            _ => Err(vec!["CSV header could not be read".to_string()]),
        }
    }

    /// Extracts `(course_id, category_id)` from one data row. `row_number`
    /// counts data rows from 1 and only appears in error messages.
    pub fn parse_row(&self, row: &csv::StringRecord, row_number: usize) -> Result<(i64, i64), Vec<String>> {
        let course = self.course.read(row, row_number);
        let category = self.category.read(row, row_number);
        match (course, category) {
            (Ok(course), Ok(category)) => Ok((course, category)),
            (course, category) => Err(course.err().into_iter().chain(category.err()).collect()),
        }
    }
}

impl Located {
    fn read(&self, row: &csv::StringRecord, row_number: usize) -> Result<i64, String> {
        let cell = row.get(self.index).unwrap_or("").trim();
        let value = match self.column {
            "url" => course_id_from_url(cell),
            _ => parse_integer(cell),
        };
        value.ok_or_else(|| {
            format!(
                "Non integer value for {} found on row {}",
                self.column, row_number
            )
        })
    }
}

fn parse_integer(cell: &str) -> Option<i64> {
    cell.parse().ok()
}

/// The `id` query parameter of a course URL such as
/// `https://lms.example.org/course/view.php?id=2`.
fn course_id_from_url(cell: &str) -> Option<i64> {
    let url = Url::parse(cell).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .and_then(|(_, value)| parse_integer(value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> csv::StringRecord {
        csv::StringRecord::from(fields.to_vec())
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let map = HeaderMap::from_headers(["CategoryID", "CourseId"]).unwrap();
        assert_eq!(map.parse_row(&record(&["1", "2"]), 1).unwrap(), (2, 1));
    }

    #[test]
    fn test_leftmost_course_heading_wins() {
        let row = record(&["https://x.test/course/view.php?id=9", "4", "1"]);
        let map = HeaderMap::from_headers(["url", "courseid", "categoryid"]).unwrap();
        assert_eq!(map.parse_row(&row, 1).unwrap(), (9, 1));

        let row = record(&["4", "https://x.test/course/view.php?id=9", "1"]);
        let map = HeaderMap::from_headers(["courseid", "url", "categoryid"]).unwrap();
        assert_eq!(map.parse_row(&row, 1).unwrap(), (4, 1));
    }

    #[test]
    fn test_missing_groups_reported_in_order() {
        let errors = HeaderMap::from_headers(["name"]).unwrap_err();
        assert_eq!(
            errors,
            vec![
                "CSV file must include one of courseid, url as column headings".to_string(),
                "CSV file must include one of categoryid as column headings".to_string(),
            ]
        );
    }

    #[test]
    fn test_url_yields_id_parameter() {
        assert_eq!(course_id_from_url("https://lms.test/course/view.php?id=2"), Some(2));
        assert_eq!(course_id_from_url("https://lms.test/course/view.php?section=1&id=7"), Some(7));
        assert_eq!(course_id_from_url("https://lms.test/course/view.php"), None);
        assert_eq!(course_id_from_url("view.php?id=2"), None);
    }

    #[test]
    fn test_row_errors_name_row_and_column() {
        let map = HeaderMap::from_headers(["courseid", "categoryid"]).unwrap();
        let errors = map.parse_row(&record(&["abc", ""]), 3).unwrap_err();
        assert_eq!(
            errors,
            vec![
                "Non integer value for courseid found on row 3".to_string(),
                "Non integer value for categoryid found on row 3".to_string(),
            ]
        );
    }
}
