/// Parses free-form price text such as `"19,800원"` into an integer price.
///
/// Every non-digit character is dropped. Returns `None` when no digit is
/// left or the number does not fit an `i64`.
pub fn extract_price(text: &str) -> Option<i64> {
    let mut seen_digit = false;
    let mut value: i64 = 0;

    for digit in text.chars().filter_map(|c| c.to_digit(10)) {
        seen_digit = true;
        value = value.checked_mul(10)?.checked_add(digit as i64)?;
    }

    seen_digit.then_some(value)
}
