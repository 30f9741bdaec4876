use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A request-side line: which product and how many units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemWithQuantity {
    pub product_id: String,
    pub quantity: i64,
}

impl ItemWithQuantity {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// An order line once stock has been reserved and a price attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub product_id: String,
    pub quantity: i64,
    pub price_id: String,
}

impl Item {
    pub fn to_item_with_quantity(&self) -> ItemWithQuantity {
        ItemWithQuantity::new(self.product_id.clone(), self.quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    WaitingForPayment,
    Paid,
    Ready,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::WaitingForPayment => "waiting_for_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Ready => "ready",
        }
    }

    /// The only status an order may hold right before entering `self`.
    /// `Pending` is initial-only and has no predecessor.
    pub fn required_predecessor(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => None,
            OrderStatus::WaitingForPayment => Some(OrderStatus::Pending),
            OrderStatus::Paid => Some(OrderStatus::WaitingForPayment),
            OrderStatus::Ready => Some(OrderStatus::Paid),
        }
    }

    /// Re-applying the current status is accepted so that a redelivered event
    /// can rewrite the payment link without tripping the state machine.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        *self == next || next.required_predecessor() == Some(*self)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown order status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "waiting_for_payment" => Ok(OrderStatus::WaitingForPayment),
            "paid" => Ok(OrderStatus::Paid),
            "ready" => Ok(OrderStatus::Ready),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// The order as it travels between services, on the broker and over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub payment_link: String,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("order {order_id} cannot move from {from} to {to}")]
pub struct IllegalTransition {
    pub order_id: String,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl Order {
    pub fn items_with_quantity(&self) -> Vec<ItemWithQuantity> {
        self.items.iter().map(Item::to_item_with_quantity).collect()
    }

    /// Moves the order to `next`, or leaves it untouched when the current
    /// status is not the required predecessor.
    pub fn update_status_to(&mut self, next: OrderStatus) -> Result<(), IllegalTransition> {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                order_id = %self.id,
                current_status = %self.status,
                target_status = %next,
                "Illegal order status transition"
            );
            return Err(IllegalTransition {
                order_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Merges lines for the same product by summing quantities. The first
/// occurrence of a product fixes its position in the output, and packing an
/// already packed list returns it unchanged. Fails when a summed quantity
/// does not fit in an `i64`.
pub fn pack_items(items: &[ItemWithQuantity]) -> Result<Vec<ItemWithQuantity>, String> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut packed: Vec<ItemWithQuantity> = Vec::with_capacity(items.len());

    for item in items {
        match position.get(item.product_id.as_str()) {
            Some(&idx) => {
                let line = &mut packed[idx];
                line.quantity = line
                    .quantity
                    .checked_add(item.quantity)
                    .ok_or_else(|| format!("total quantity for product {} is too large", item.product_id))?;
            }
            None => {
                position.insert(&item.product_id, packed.len());
                packed.push(item.clone());
            }
        }
    }

    Ok(packed)
}

/// Rejects empty requests, blank product ids and non-positive quantities.
pub fn validate_items(items: &[ItemWithQuantity]) -> Result<(), String> {
    if items.is_empty() {
        return Err("must have at least one item".to_string());
    }

    let invalid: Vec<String> = items
        .iter()
        .filter(|item| item.product_id.trim().is_empty() || item.quantity <= 0)
        .map(|item| format!("{}x{:?}", item.quantity, item.product_id))
        .collect();

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "items need a product id and a positive quantity, got [{}]",
            invalid.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_items_sums_duplicates_in_first_seen_order() {
        let packed = pack_items(&[
            ItemWithQuantity::new("b", 1),
            ItemWithQuantity::new("a", 2),
            ItemWithQuantity::new("b", 4),
            ItemWithQuantity::new("a", 3),
        ])
        .unwrap();

        assert_eq!(
            packed,
            vec![ItemWithQuantity::new("b", 5), ItemWithQuantity::new("a", 5)]
        );
        assert_eq!(pack_items(&packed).unwrap(), packed);
    }

    #[test]
    fn pack_items_rejects_overflowing_totals() {
        let err = pack_items(&[ItemWithQuantity::new("a", i64::MAX), ItemWithQuantity::new("a", 2)]).unwrap_err();
        assert!(err.contains("product a"));

        let packed = pack_items(&[ItemWithQuantity::new("a", i64::MAX), ItemWithQuantity::new("b", 2)]).unwrap();
        assert_eq!(packed.len(), 2);
    }

    #[test]
    fn validate_items_rejects_empty_and_non_positive() {
        assert!(validate_items(&[]).is_err());
        assert!(validate_items(&[ItemWithQuantity::new("a", 0)]).is_err());
        assert!(validate_items(&[ItemWithQuantity::new(" ", 1)]).is_err());
        assert!(validate_items(&[ItemWithQuantity::new("a", 1)]).is_ok());
    }

    #[test]
    fn status_transitions_follow_the_predecessor_table() {
        use OrderStatus::*;

        assert!(!Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(WaitingForPayment));
        assert!(WaitingForPayment.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Pending));
        assert!(!WaitingForPayment.can_transition_to(Ready));
        assert!(!Paid.can_transition_to(WaitingForPayment));
        assert!(Paid.can_transition_to(Paid));
    }

    #[test]
    fn illegal_transition_leaves_order_unchanged() {
        let mut order = Order {
            id: "o1".into(),
            customer_id: "c1".into(),
            status: OrderStatus::Pending,
            payment_link: String::new(),
            items: vec![],
        };

        let err = order.update_status_to(OrderStatus::Paid).unwrap_err();
        assert_eq!(err.to_string(), "order o1 cannot move from pending to paid");
        assert_eq!(order.status, OrderStatus::Pending);

        order.update_status_to(OrderStatus::WaitingForPayment).unwrap();
        order.update_status_to(OrderStatus::Paid).unwrap();
        order.update_status_to(OrderStatus::Ready).unwrap();
        assert!(order.update_status_to(OrderStatus::Pending).is_err());
        assert_eq!(order.status, OrderStatus::Ready);
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_string(&OrderStatus::WaitingForPayment).unwrap();
        assert_eq!(json, "\"waiting_for_payment\"");
        assert_eq!(
            "waiting_for_payment".parse::<OrderStatus>().unwrap(),
            OrderStatus::WaitingForPayment
        );
        assert!("canceled".parse::<OrderStatus>().is_err());
    }
}
