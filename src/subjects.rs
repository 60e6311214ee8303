use crate::models::Year;

const YEAR_ONE: &[&str] = &[
    "Communicative English",
    "Engineering Chemistry",
    "Linear Algebra & Calculus",
    "Basic Civil & Mechanical Engineering",
    "Introduction to Programming",
    "Communicative English Lab",
    "Engineering Chemistry Lab",
    "Engineering Workshop",
    "Computer Programming Lab",
];

const YEAR_TWO: &[&str] = &[
    "Discrete Mathematics & Graph Theory",
    "Universal Human Values",
    "Digital Logic & Computer Organization",
    "Advanced Data Structures & Algorithm Analysis",
    "Object Oriented Programming Through Java",
    "Advanced Data Structures Lab",
    "OOP Through Java Lab",
    "Python Programming",
];

const YEAR_THREE: &[&str] = &[
    "Data Warehousing and Data Mining",
    "Computer Networks",
    "Formal Languages and Automata Theory",
    "Professional Elective",
    "Open Elective",
    "Data Mining Lab",
    "Computer Networks Lab",
    "Full Stack Lab",
    "NPTEL",
];

const YEAR_FOUR: &[&str] = &[
    "Software Engineering",
    "Web Technologies",
    "Cloud Computing",
    "Machine Learning",
    "Big Data Analytics",
    "Project Lab",
];

/// Default subject list offered when recording attendance for a year.
pub fn subjects_for_year(year: Year) -> &'static [&'static str] {
    match year.get() {
        1 => YEAR_ONE,
        2 => YEAR_TWO,
        3 => YEAR_THREE,
        _ => YEAR_FOUR,
    }
}

/// First subject of the year, used when no subject is given.
pub fn default_subject(year: Year) -> &'static str {
    subjects_for_year(year)[0]
}
