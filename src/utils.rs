/// Group the digits of an integer for readable progress reports:
/// `1234567` -> `"1 234 567"`.
pub fn group_digits<T: std::fmt::Display>(n: T) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    let offset = digits.len() % 3;
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - offset) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    grouped
}
